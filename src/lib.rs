pub mod action;
mod cancel;
pub mod canon;
pub mod checksum;
mod densemap;
pub mod error;
pub mod fs;
pub mod graph;
mod hash;
pub mod layout;
pub mod progress;
pub mod record;
mod run;
pub mod task;
mod thread_pool;
pub mod work;

pub use action::{copy, group, Action, Deposit, Publication, Rule, Step};
pub use cancel::CancelToken;
pub use checksum::{checksum, Hash, Value};
pub use error::BuildError;
pub use graph::{FileId, Graph, Published, TaskId};
pub use layout::Layout;
pub use progress::{ConsoleProgress, NoProgress, Progress};
pub use run::{start, BuildResult};
pub use work::{Failure, Options};
