use std::path::PathBuf;

use crate::db::Context;
use crate::native::Deployment;

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub files_folder: PathBuf,
    pub namespace: String,
    pub schema_location: String,
    pub embed_files: bool,
    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| "DATABASE_URL must be set")?;

        let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let files_folder = base_dir.join(
            std::env::var("FILES_DIR").unwrap_or_else(|_| "files".to_string())
        );

        let namespace = std::env::var("NATIVE_NAMESPACE")
            .unwrap_or_else(|_| "http://pkp.sfu.ca".to_string());
        let schema_location = std::env::var("NATIVE_SCHEMA")
            .unwrap_or_else(|_| "native.xsd".to_string());
        let embed_files = std::env::var("EMBED_FILES")
            .map(|v| parse_flag(&v))
            .unwrap_or(true);

        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "5001".to_string())
            .parse()
            .unwrap_or(5001);

        Ok(Self {
            database_url,
            files_folder,
            namespace,
            schema_location,
            embed_files,
            host,
            port,
        })
    }

    /// Document settings for submissions of `context`.
    pub fn deployment(&self, context: Context) -> Deployment {
        let mut deployment = Deployment::new(&self.namespace, &self.schema_location, context);
        deployment.embed_files = self.embed_files;
        deployment
    }
}

fn parse_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_default_to_on() {
        assert!(parse_flag("true"));
        assert!(parse_flag("1"));
        assert!(parse_flag(""));
        assert!(!parse_flag("false"));
        assert!(!parse_flag(" OFF "));
        assert!(!parse_flag("0"));
    }

    #[test]
    fn deployment_carries_document_settings() {
        let config = Config {
            database_url: "postgres://localhost/test".to_string(),
            files_folder: PathBuf::from("files"),
            namespace: "http://pkp.sfu.ca".to_string(),
            schema_location: "native.xsd".to_string(),
            embed_files: false,
            host: "127.0.0.1".to_string(),
            port: 5001,
        };
        let context = Context {
            id: 3,
            path: "press".to_string(),
            primary_locale: "fr_CA".to_string(),
        };

        let deployment = config.deployment(context);
        assert_eq!(deployment.namespace, "http://pkp.sfu.ca");
        assert_eq!(deployment.schema_location, "native.xsd");
        assert_eq!(deployment.primary_locale(), "fr_CA");
        assert!(!deployment.embed_files);
    }
}
