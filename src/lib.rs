#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

// Genotype encoding detection and normalization to the signed {-1, 0, 1} scale.
#[path = "../encode/mod.rs"]
pub mod encode;

// Stability selection on top of an L1-penalized linear solver.
#[path = "../select/mod.rs"]
pub mod select;

#[path = "../predict/mod.rs"]
pub mod predict;

#[path = "../evaluate/mod.rs"]
pub mod evaluate;

// Tab-separated table loading and matrix output shared by the command-line front end.
#[path = "../shared/table.rs"]
pub mod table;
