//! # Optimizer Module
//!
//! Motore di esecuzione del run, separato in sottomoduli:
//! - `walker`: orchestratore principale (directory, container, finalizzazione)
//! - `pool`: pool limitato di task con semaforo
//! - `task_graph`: arena dei nodi directory/container e dei loro handle

pub mod pool;
pub mod task_graph;
pub mod walker;

pub use pool::{TaskHandle, TaskPool};
pub use walker::Walker;
