// Process plumbing used by every command.
pub mod lock;
pub mod shutdown;
