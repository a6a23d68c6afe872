//! # Systems
//!
//! A system is any unit of work over a [`World`]. Closures and functions
//! with the signature `FnMut(&mut World) -> EcsResult<()>` are systems, and
//! [`pipe`] sequences several of them into one.
//!
//! ```rust
//! use strata_core::{define_system, pipe, EcsResult, System, World, WorldConfig};
//!
//! let spawn = define_system(|world: &mut World| -> EcsResult<()> {
//!     world.add_entity()?;
//!     Ok(())
//! });
//! let cull = define_system(|world: &mut World| -> EcsResult<()> {
//!     world.remove_entity(0)?;
//!     world.commit_removals();
//!     Ok(())
//! });
//!
//! let mut world = World::with_config(WorldConfig::fixed(8)).unwrap();
//! let mut frame = pipe![spawn, spawn, cull];
//! frame.run(&mut world).unwrap();
//! assert_eq!(world.entities(), vec![1]);
//! ```

use super::world::World;
use crate::error::EcsResult;

/// A unit of work over a world.
pub trait System {
    /// Runs the system once.
    ///
    /// # Errors
    ///
    /// Whatever the system reports; the world is left as the system left it.
    fn run(&mut self, world: &mut World) -> EcsResult<()>;
}

impl<F> System for F
where
    F: FnMut(&mut World) -> EcsResult<()>,
{
    #[inline]
    fn run(&mut self, world: &mut World) -> EcsResult<()> {
        self(world)
    }
}

/// Marks a function as a system. Returns it unchanged.
#[inline]
#[must_use]
pub fn define_system<F>(system: F) -> F
where
    F: FnMut(&mut World) -> EcsResult<()>,
{
    system
}

/// Systems run left to right as one.
///
/// Stops at the first stage that fails and returns its error; later stages
/// do not run.
#[derive(Default)]
pub struct Pipe {
    stages: Vec<Box<dyn System>>,
}

impl Pipe {
    /// Creates an empty pipe, which does nothing when run.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage.
    #[must_use]
    pub fn then<S: System + 'static>(mut self, stage: S) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Number of stages.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns `true` if the pipe has no stages.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl System for Pipe {
    fn run(&mut self, world: &mut World) -> EcsResult<()> {
        for stage in &mut self.stages {
            stage.run(world)?;
        }
        Ok(())
    }
}

/// Composes boxed stages into a [`Pipe`].
#[must_use]
pub fn pipe<I>(stages: I) -> Pipe
where
    I: IntoIterator<Item = Box<dyn System>>,
{
    Pipe {
        stages: stages.into_iter().collect(),
    }
}

/// Composes systems of any type into a [`Pipe`].
///
/// `pipe![a, b, c]` runs `a`, then `b`, then `c`. Stages must be `'static`;
/// a `Copy` closure may appear more than once.
#[macro_export]
macro_rules! pipe {
    ($($stage:expr),* $(,)?) => {
        $crate::Pipe::new()$(.then($stage))*
    };
}
