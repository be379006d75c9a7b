//! Host terminal output for the driver.
//!
//! - **renderer**: draws the grid's dirty view with crossterm

pub mod renderer;

pub use renderer::Renderer;
