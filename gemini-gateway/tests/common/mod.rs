#![allow(dead_code)]

use gemini_gateway::config::GatewayConfig;
use gemini_gateway::services::session::{GenerationBackend, MockBackend};
use gemini_gateway::startup::Application;
use service_core::config::Config as CoreConfig;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

pub struct TestApp {
    pub address: String,
    pub staging_dir: PathBuf,
    pub images_dir: PathBuf,
    pub client: reqwest::Client,
}

/// Gateway configuration for tests: port 0, scratch directories under
/// `target/`, dummy credentials.
pub fn test_config() -> GatewayConfig {
    let run = Uuid::new_v4();
    let vars: HashMap<&str, String> = HashMap::from([
        ("GEMINI_PSID", "test-psid-cookie".to_string()),
        ("GEMINI_PSIDTS", "test-psidts-cookie".to_string()),
        ("GATEWAY_BACKEND", "mock".to_string()),
        (
            "GATEWAY_STAGING_DIR",
            format!("target/test-staging-{}", run),
        ),
        ("GATEWAY_IMAGES_DIR", format!("target/test-images-{}", run)),
    ]);

    let common = CoreConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
    };

    GatewayConfig::from_lookup(common, |key| vars.get(key).cloned())
        .expect("Failed to build test configuration")
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(MockBackend::new()).await
    }

    pub async fn spawn_with(backend: impl GenerationBackend + 'static) -> Self {
        let config = test_config();
        let staging_dir = config.storage.staging_dir.clone();
        let images_dir = config.storage.images_dir.clone();

        let app = Application::build_with_backend(config, Box::new(backend))
            .await
            .expect("Failed to build test application");
        let address = format!("http://127.0.0.1:{}", app.port());

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        let client = reqwest::Client::new();
        for _ in 0..50 {
            if client
                .get(format!("{}/health", address))
                .send()
                .await
                .is_ok()
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        TestApp {
            address,
            staging_dir,
            images_dir,
            client,
        }
    }

    pub async fn post_prompt(&self, route: &str, prompt: &str) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.address, route))
            .json(&serde_json::json!({ "prompt": prompt }))
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Files left in the staging directory.
    pub async fn staged_files(&self) -> usize {
        let mut entries = tokio::fs::read_dir(&self.staging_dir)
            .await
            .expect("Failed to read staging directory");
        let mut count = 0;
        while entries
            .next_entry()
            .await
            .expect("Failed to read entry")
            .is_some()
        {
            count += 1;
        }
        count
    }

    pub async fn cleanup(&self) {
        let _ = tokio::fs::remove_dir_all(&self.staging_dir).await;
        let _ = tokio::fs::remove_dir_all(&self.images_dir).await;
    }
}
