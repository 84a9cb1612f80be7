//! Smart crowd counter client.
//!
//! Uploads conference session photos to a stage, refreshes the stage's
//! directory table, and browses the counts an external analysis pipeline
//! writes to the crowd counter table. The pieces, leaf first:
//!
//! - [`gateway`] runs SQL through the platform's REST API
//! - [`stage`] creates the stage, uploads bytes, and refreshes the directory table
//! - [`settle`] waits for the refresh to become visible
//! - [`presign`] turns a staged path into a time-limited URL
//! - [`descriptor`] reads the `FILE_NAME` column
//! - [`analytics`] and [`detail`] build the per-row view
//! - [`session`] owns the session state and sequences everything

pub mod analytics;
pub mod catalog;
pub mod config;
pub mod descriptor;
pub mod detail;
pub mod error;
pub mod gateway;
pub mod ident;
pub mod presign;
pub mod session;
pub mod settle;
pub mod snapshot;
pub mod stage;
pub mod testing;

pub use crate::catalog::SchemaChoice;
pub use crate::config::{CrowdConfig, config_path, load_config};
pub use crate::descriptor::{FileDescriptor, RawDescriptor};
pub use crate::detail::{DetailPanel, ImagePane};
pub use crate::error::{CrowdError, MetadataWarning};
pub use crate::gateway::{QueryGateway, SqlApiGateway, Statement};
pub use crate::session::{Controller, Phase, RefreshReport, SessionState, StepStatus, UploadReport};
pub use crate::settle::{SettleOutcome, SettlePolicy};
pub use crate::snapshot::{SessionRecord, Snapshot};
pub use crate::stage::{StageLocation, UploadFile};

pub type Result<T> = std::result::Result<T, CrowdError>;
