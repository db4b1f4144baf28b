//! Test server management.
//!
//! Spawns and manages palaverd instances for integration testing. Tests
//! seed the principal directory directly through the server's SQLite file,
//! the way the platform's identity service would in production.

#![allow(dead_code)]

use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::PathBuf;
use std::process::{Child, Command};
use std::time::Duration;
use tokio::time::sleep;

/// Signing key shared between tests and the spawned server.
pub const TEST_SIGNING_KEY: &str = "integration-test-signing-key-0001";
/// Issuer the spawned server expects.
pub const TEST_ISSUER: &str = "palaver-test";

#[derive(Serialize)]
struct Claims {
    sub: i64,
    iss: String,
    exp: i64,
    jti: String,
}

/// A test server instance.
pub struct TestServer {
    child: Child,
    port: u16,
    http_port: u16,
    data_dir: PathBuf,
}

impl TestServer {
    /// Spawn a new test server on the given ports.
    pub async fn spawn(port: u16, http_port: u16) -> anyhow::Result<Self> {
        let data_dir = std::env::temp_dir().join(format!("palaverd-test-{}", port));
        std::fs::create_dir_all(&data_dir)?;

        let config_path = data_dir.join("config.toml");
        let config_content = format!(
            r#"
[server]
name = "test.palaver"
listen = "127.0.0.1:{port}"
http_listen = "127.0.0.1:{http_port}"
heartbeat_secs = 30
slow_consumer_grace_ms = 500

[auth]
signing_key = "{TEST_SIGNING_KEY}"
issuer = "{TEST_ISSUER}"

[database]
url = "{db}"

[limits]
messages_per_minute = 10000
room_messages_per_ten_secs = 10000
joins_per_minute = 1000
room_creates_per_minute = 1000
"#,
            db = data_dir.join("test.db").display(),
        );

        std::fs::write(&config_path, config_content)?;

        // Build path to the palaverd binary (in the workspace target dir)
        let cargo_manifest_dir = env!("CARGO_MANIFEST_DIR");
        let binary_path = PathBuf::from(cargo_manifest_dir).join("target/debug/palaverd");

        let child = Command::new(&binary_path)
            .arg(config_path.to_str().unwrap())
            .spawn()?;

        let server = Self {
            child,
            port,
            http_port,
            data_dir,
        };

        server.wait_until_ready().await?;
        Ok(server)
    }

    async fn wait_until_ready(&self) -> anyhow::Result<()> {
        for _ in 0..100 {
            if tokio::net::TcpStream::connect(("127.0.0.1", self.port))
                .await
                .is_ok()
            {
                // Give the gateway a beat to finish wiring.
                sleep(Duration::from_millis(50)).await;
                return Ok(());
            }
            sleep(Duration::from_millis(100)).await;
        }
        anyhow::bail!("server did not start listening on port {}", self.port)
    }

    /// WebSocket URL carrying the bearer token as a query parameter.
    pub fn ws_url(&self, token: &str) -> String {
        format!("ws://127.0.0.1:{}/ws?token={}", self.port, token)
    }

    /// Base URL of the auxiliary HTTP surface.
    pub fn http_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.http_port)
    }

    /// Mint a valid bearer token for a principal.
    pub fn token_for(&self, principal_id: i64) -> String {
        let claims = Claims {
            sub: principal_id,
            iss: TEST_ISSUER.to_string(),
            exp: chrono::Utc::now().timestamp() + 3600,
            jti: format!("test-{}-{}", principal_id, self.port),
        };
        jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(TEST_SIGNING_KEY.as_bytes()),
        )
        .expect("token encoding")
    }

    /// Mint a token that expired an hour ago.
    pub fn expired_token_for(&self, principal_id: i64) -> String {
        let claims = Claims {
            sub: principal_id,
            iss: TEST_ISSUER.to_string(),
            exp: chrono::Utc::now().timestamp() - 3600,
            jti: format!("expired-{}", principal_id),
        };
        jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(TEST_SIGNING_KEY.as_bytes()),
        )
        .expect("token encoding")
    }

    /// Insert a principal row, as the identity service would.
    pub async fn seed_principal(
        &self,
        id: i64,
        display_name: &str,
        role: &str,
    ) -> anyhow::Result<()> {
        let options = SqliteConnectOptions::new().filename(self.data_dir.join("test.db"));
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO principals (id, display_name, role, status, email_verified, created_at)
            VALUES (?, ?, ?, 'active', 1, ?)
            ON CONFLICT(id) DO UPDATE SET display_name = excluded.display_name, role = excluded.role
            "#,
        )
        .bind(id)
        .bind(display_name)
        .bind(role)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&pool)
        .await?;
        pool.close().await;
        Ok(())
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.data_dir);
    }
}
