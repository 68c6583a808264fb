//! Push processors, one module per chain stage, in chain order.

pub mod parse_push;
pub mod check_repo_in_authorised_list;
pub mod check_commit_messages;
pub mod check_author_emails;
pub mod check_user_push_permission;
pub mod check_if_waiting_auth;
pub mod pull_remote;
pub mod write_pack;
pub mod check_empty_branch;
pub mod check_hidden_commits;
pub mod pre_receive;
pub mod get_diff;
pub mod clear_bare_clone;
pub mod scan_diff;
pub mod block_for_auth;

pub use block_for_auth::BlockForAuth;
pub use check_author_emails::CheckAuthorEmails;
pub use check_commit_messages::CheckCommitMessages;
pub use check_empty_branch::CheckEmptyBranch;
pub use check_hidden_commits::CheckHiddenCommits;
pub use check_if_waiting_auth::CheckIfWaitingAuth;
pub use check_repo_in_authorised_list::CheckRepoInAuthorisedList;
pub use check_user_push_permission::CheckUserPushPermission;
pub use clear_bare_clone::ClearBareClone;
pub use get_diff::GetDiff;
pub use parse_push::ParsePush;
pub use pre_receive::PreReceive;
pub use pull_remote::PullRemote;
pub use scan_diff::ScanDiff;
pub use write_pack::WritePack;
