//! Bounded reachability for explicit-state MDPs, stochastic two-player games and CTMDPs.
//!
//! Models are built with the builders in [`model`], [`stpg`] and [`ctmdp`], target and remain
//! sets come from [`labels`], and [`checker::ProbChecker`] computes the optimal probabilities.

pub mod checker;
pub mod ctmdp;
pub mod diagnostics;
pub mod error;
pub mod labels;
pub mod matrix;
pub mod minmax;
pub mod model;
pub mod poisson;
pub mod property;
pub mod qualitative;
pub mod rewards;
pub mod settings;
pub mod stpg;

pub use checker::{ModelCheckerResult, ProbChecker};
pub use ctmdp::{Ctmdp, CtmdpBuilder};
pub use error::{CheckError, Result};
pub use labels::{Labels, StateSet};
pub use matrix::{CheckableNumber, Distribution};
pub use minmax::{Direction, MinMax};
pub use model::{ExplicitModel, Mdp, MdpBuilder, ModelType, NondetModel};
pub use property::{BoundedUntil, Interval, StepBound, TimeBound};
pub use settings::CheckerSettings;
pub use stpg::{Player, Stpg, StpgBuilder};
