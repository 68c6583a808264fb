//! Request processors.
//!
//! The pre-processor turns a raw pack-POST into an [`Action`], and the
//! push processors inspect that action one step at a time. Every
//! processor implements [`Inspector`] and records its verdict as a
//! [`Step`] on the action, so the full decision trail survives into
//! the audit record.
//!
//! [`Action`]: crate::action::Action
//! [`Inspector`]: crate::inspector::Inspector
//! [`Step`]: crate::action::Step

pub mod pre;
pub mod push;

pub use pre::ParseAction;
