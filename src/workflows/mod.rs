pub mod maintenance;
mod on_repeat;

pub use on_repeat::OnRepeatWorkflow;
