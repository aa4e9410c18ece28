pub mod format;
pub mod hash;
pub mod relocate;
pub mod stability;

pub use format::*;
pub use hash::*;
pub use relocate::*;
pub use stability::*;

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not move {} to {}: {source}", .from.display(), .to.display())]
    Relocation {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Path has no file name: {}", .0.display())]
    MissingFileName(PathBuf),
}
