//! Declares and synthesizes the container registry stack and the GPU EKS
//! cluster stack that pulls its images from it.

pub mod assembly;
pub mod cli;
pub mod cloud;
pub mod config;
pub mod graph;
pub mod k8s;
pub mod registry;
pub mod stacks;
pub mod template;
