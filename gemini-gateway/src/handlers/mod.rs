pub mod generate;
pub mod health;

pub use generate::{
    generate_image, generate_image_base64, generate_image_binary, generate_text,
    generate_with_images,
};
pub use health::{health_check, metrics, readiness_check};
