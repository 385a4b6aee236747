//! Context routing: choose a processing route for each user turn and
//! maintain per-conversation chain state.

pub mod context_router;

pub use context_router::ContextRouter;
