//! When to speak up unprompted, and what to say.

pub mod comment;
pub mod engine;

pub use comment::{AutonomousComment, CommentGenerator, CommentPlan, CommentType};
pub use engine::{ChatEngagementState, ChatStats, DecisionEngine};
