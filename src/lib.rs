//! texpreview: compile a LaTeX snippet and return its first page as PNG.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;

#[cfg(test)]
pub(crate) mod test_support;
