// SPDX-License-Identifier: BSD-3-Clause

//! The subnet address pool, and the per-address authorizer built on top of
//! it, that live inside each sender child.

pub mod authorizer;
pub mod pool;

pub use authorizer::Authorizer;
pub use pool::SubnetPool;
