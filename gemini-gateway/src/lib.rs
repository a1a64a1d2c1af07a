//! HTTP gateway forwarding text and image generation requests to a
//! cookie-authenticated Gemini web session.

pub mod config;
pub mod dtos;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;
