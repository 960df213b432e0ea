mod tools;

pub use tools::{GuidesServer, SearchByFileRequest, SearchDocumentationRequest, SharedIndex};
