use log::{error, warn};
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use postgres_openssl::MakeTlsConnector;
use tokio::time::Duration;
use tokio_postgres::{Client, NoTls};
use url::Url;

pub const MAX_RETRIES: usize = 10;
pub const WAIT_BETWEEN_RETRIES: u64 = 5;

/// TLS connector trusting the CA bundle at `sslrootcert_path`
///
/// The server certificate must chain to that bundle; a connection to an
/// unverified server is refused rather than silently accepted.
pub fn create_ssl_connector(sslrootcert_path: &str) -> Result<MakeTlsConnector, String> {
    let mut builder =
        SslConnector::builder(SslMethod::tls()).map_err(|e| format!("SSL builder error: {}", e))?;

    builder
        .set_ca_file(sslrootcert_path)
        .map_err(|e| format!("Error loading CA cert: {}", e))?;

    builder.set_verify(SslVerifyMode::PEER);

    Ok(MakeTlsConnector::new(builder.build()))
}

/// Split the `sslrootcert` parameter out of a connection URL
///
/// tokio-postgres does not understand `sslrootcert`, so it is removed from
/// the URL handed to the driver and returned separately.
pub fn split_sslrootcert(database_url: &str) -> Result<(String, Option<String>), String> {
    let url = Url::parse(database_url).map_err(|e| format!("URL parse error: {}", e))?;

    let mut sslrootcert_path = None;
    let mut clean_params = Vec::new();
    for (key, value) in url.query_pairs() {
        if key == "sslrootcert" {
            sslrootcert_path = Some(value.to_string());
        } else {
            clean_params.push((key.into_owned(), value.into_owned()));
        }
    }

    let mut clean_url = url.clone();
    clean_url.set_query(None);
    if !clean_params.is_empty() {
        let query = clean_params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        clean_url.set_query(Some(&query));
    }

    Ok((clean_url.to_string(), sslrootcert_path))
}

async fn connect_once(database_url: &str) -> Result<Client, String> {
    let (clean_database_url, sslrootcert_path) = split_sslrootcert(database_url)?;

    let client = match sslrootcert_path {
        Some(path) => {
            let connector = create_ssl_connector(&path)?;
            let (client, connection) = tokio_postgres::connect(&clean_database_url, connector)
                .await
                .map_err(|e| format!("Connection error: {}", e))?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    error!("Connection error: {}", e);
                }
            });
            client
        }
        None => {
            let (client, connection) = tokio_postgres::connect(&clean_database_url, NoTls)
                .await
                .map_err(|e| format!("Connection error: {}", e))?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    error!("Connection error: {}", e);
                }
            });
            client
        }
    };

    Ok(client)
}

/// Open a client, making up to `max_retries` connection attempts
pub async fn connect_with_retry(database_url: &str, max_retries: usize) -> Result<Client, String> {
    for attempt in 0..max_retries {
        match connect_once(database_url).await {
            Ok(client) => return Ok(client),
            Err(e) => warn!("Database attempt {}: {}", attempt + 1, e),
        }

        if attempt + 1 < max_retries {
            tokio::time::sleep(Duration::from_secs(WAIT_BETWEEN_RETRIES)).await;
        }
    }

    Err("Max retries exceeded".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_sslrootcert_and_keeps_other_params() {
        let (url, cert) = split_sslrootcert(
            "postgres://egret:pw@db.local:5432/dash?sslmode=require&sslrootcert=/etc/ca.pem",
        )
        .unwrap();
        assert_eq!(url, "postgres://egret:pw@db.local:5432/dash?sslmode=require");
        assert_eq!(cert.as_deref(), Some("/etc/ca.pem"));
    }

    #[test]
    fn plain_urls_pass_through() {
        let (url, cert) = split_sslrootcert("postgres://egret@localhost/dash").unwrap();
        assert_eq!(url, "postgres://egret@localhost/dash");
        assert_eq!(cert, None);
    }

    #[test]
    fn ssl_connector_needs_a_readable_ca_bundle() {
        let err = create_ssl_connector("/nonexistent/egret-ca.pem").err().unwrap();
        assert!(err.starts_with("Error loading CA cert"));
    }

    #[test]
    fn rejects_garbage_urls() {
        assert!(split_sslrootcert("not a url").is_err());
    }
}
