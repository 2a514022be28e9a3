// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

pub mod cache;
pub mod fields;
pub mod forms;
pub mod ids;
pub mod model;
pub mod reconcile;
pub mod remote;
pub mod search;
pub mod session;
pub mod state;

pub use cache::*;
pub use fields::*;
pub use forms::*;
pub use ids::*;
pub use model::*;
pub use reconcile::*;
pub use remote::*;
pub use search::*;
pub use session::*;
pub use state::*;
