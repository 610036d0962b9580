pub mod arn;
pub mod config;
pub mod document;
pub mod template;

// Re-export the data model for easy access
pub use arn::IamArn;
pub use config::Config;
pub use document::PolicyDocument;
pub use template::Template;
