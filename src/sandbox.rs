use crate::config::SandboxConfig;
use crate::models::{FileMap, SandboxState};
use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const TEMPLATE: &str = "expo";
const QR_API_URL: &str = "https://api.qrserver.com/v1/create-qr-code/";

#[derive(Serialize, Debug)]
struct SandboxFile {
    content: String,
}

#[derive(Serialize, Debug)]
struct PublishRequest {
    files: BTreeMap<String, SandboxFile>,
    template: &'static str,
}

#[derive(Deserialize, Debug)]
struct PublishResponse {
    sandbox: SandboxInfo,
}

#[derive(Deserialize, Debug)]
struct SandboxInfo {
    id: String,
}

/// Client for the remote sandbox/preview service. A publish call pushes a
/// full file set and yields the sandbox identifier plus the derived preview
/// and QR-code URLs. Passing an existing identifier updates that sandbox
/// instead of minting a new one.
pub struct SandboxClient {
    client: Client,
    config: SandboxConfig,
}

impl SandboxClient {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub async fn publish(
        &self,
        api_key: &str,
        files: &FileMap,
        existing_sandbox_id: Option<&str>,
    ) -> Result<SandboxState> {
        let request = PublishRequest {
            files: prepare_files(files),
            template: TEMPLATE,
        };

        let base = self.config.api_url.trim_end_matches('/');
        let (endpoint, method) = match existing_sandbox_id {
            Some(id) => (format!("{base}/sandboxes/{id}"), reqwest::Method::PUT),
            None => (format!("{base}/sandboxes/create"), reqwest::Method::POST),
        };
        log::info!(
            "Publishing {} files to sandbox service ({})",
            request.files.len(),
            endpoint
        );

        let response = self
            .client
            .request(method, &endpoint)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to sandbox service")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "<Failed to read error body>".to_string());
            log::error!("Sandbox publish failed with status {status}: {error_body}");
            return Err(anyhow::anyhow!(
                "Sandbox service error {status}: {error_body}"
            ));
        }

        let parsed: PublishResponse = response
            .json()
            .await
            .context("Failed to parse sandbox service response")?;
        let sandbox_id = parsed.sandbox.id;
        log::info!("Sandbox published with id: {sandbox_id}");

        Ok(SandboxState {
            preview_url: preview_url(&sandbox_id),
            qr_code_url: qr_code_url(&sandbox_id),
            sandbox_id,
        })
    }
}

/// Embeddable preview page for a published sandbox.
pub fn preview_url(sandbox_id: &str) -> String {
    format!("https://codesandbox.io/embed/{sandbox_id}")
}

/// Scannable QR image pointing at the Expo client deep link.
pub fn qr_code_url(sandbox_id: &str) -> String {
    format!("{QR_API_URL}?size=200x200&data=exp://exp.host/@codesandbox/{sandbox_id}")
}

// Wraps each file for the wire format and fills in the two scaffold files
// the template requires when the generated set does not supply them.
fn prepare_files(files: &FileMap) -> BTreeMap<String, SandboxFile> {
    let mut prepared: BTreeMap<String, SandboxFile> = files
        .iter()
        .map(|(path, content)| {
            (
                path.clone(),
                SandboxFile {
                    content: content.clone(),
                },
            )
        })
        .collect();

    if !prepared.contains_key("package.json") {
        prepared.insert(
            "package.json".to_string(),
            SandboxFile {
                content: default_package_json(),
            },
        );
    }
    if !prepared.contains_key("app.json") {
        prepared.insert(
            "app.json".to_string(),
            SandboxFile {
                content: default_app_json(),
            },
        );
    }

    prepared
}

fn default_package_json() -> String {
    let manifest = serde_json::json!({
        "name": "expo-app",
        "version": "1.0.0",
        "main": "node_modules/expo/AppEntry.js",
        "scripts": {
            "start": "expo start",
            "android": "expo start --android",
            "ios": "expo start --ios",
            "web": "expo start --web",
        },
        "dependencies": {
            "expo": "~49.0.0",
            "expo-status-bar": "~1.6.0",
            "react": "18.2.0",
            "react-dom": "18.2.0",
            "react-native": "0.72.6",
            "react-native-web": "~0.19.6",
        },
        "devDependencies": {
            "@babel/core": "^7.20.0",
            "@types/react": "~18.2.14",
            "typescript": "^5.1.3",
        },
        "private": true,
    });
    serde_json::to_string_pretty(&manifest).unwrap_or_default()
}

fn default_app_json() -> String {
    let manifest = serde_json::json!({
        "expo": {
            "name": "AI Generated App",
            "slug": "ai-generated-app",
            "version": "1.0.0",
            "orientation": "portrait",
            "icon": "./assets/icon.png",
            "userInterfaceStyle": "light",
            "splash": {
                "image": "./assets/splash.png",
                "resizeMode": "contain",
                "backgroundColor": "#ffffff",
            },
            "assetBundlePatterns": ["**/*"],
            "ios": { "supportsTablet": true },
            "android": {
                "adaptiveIcon": {
                    "foregroundImage": "./assets/adaptive-icon.png",
                    "backgroundColor": "#ffffff",
                },
            },
            "web": { "favicon": "./assets/favicon.png" },
        },
    });
    serde_json::to_string_pretty(&manifest).unwrap_or_default()
}
