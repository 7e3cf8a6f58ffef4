pub mod agent_http;
pub mod backends;
pub mod config;
mod http;
pub mod image_edit_http;
pub mod normalize;
pub mod pipeline;
pub mod planner_http;

pub use agent_http::AgentHttpEvaluator;
pub use backends::{AgentReply, EvaluatorBackend, ImageEditBackend, NotesPlanner};
pub use config::RemoteConfig;
pub use image_edit_http::ImageEditHttpBackend;
pub use pipeline::{evaluate, improve, resolve_prompt};
pub use planner_http::NotesPlannerHttp;
