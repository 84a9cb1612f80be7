pub mod catalog;
pub mod detail;
pub mod init;
pub mod session;
pub mod setup;
pub mod show;
pub mod upload;

pub use catalog::{databases_command, schemas_command};
pub use detail::{chart_command, detail_command};
pub use init::init_command;
pub use session::session_command;
pub use setup::setup_command;
pub use show::show_command;
pub use upload::{refresh_command, upload_command};
