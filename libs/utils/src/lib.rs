//! Small utilities shared between the input runtime and the controller:
//! stream/track identifiers, the MD5 challenge/response primitives, named
//! semaphores, the shared-memory slot codec, child-process supervision, and
//! logging setup.

pub mod auth;
pub mod http;
pub mod id;
pub mod logging;
pub mod process;
pub mod semaphore;
pub mod shm;
