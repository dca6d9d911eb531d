pub mod frame_stack;
pub mod gwpe;
pub mod hermitian;
pub mod inverse_power;
pub mod options;
pub mod scheduler;
pub mod spectrogram;
pub mod utils;
pub mod wls;
pub mod wola;

pub use gwpe::{DereverbError, GeneralizedWpe};
pub use hermitian::{Cholesky, HermitianSolver, Ldlt};
pub use options::{ConfigError, GwpeOptions, SolverKind};
#[cfg(feature = "parallel")]
pub use scheduler::RayonScheduler;
pub use scheduler::{BinScheduler, SequentialScheduler};
pub use spectrogram::Spectrogram;
pub use wola::{Wola, WolaError, WolaOptions};
