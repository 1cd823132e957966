use std::sync::OnceLock;

use mongodb::{Client, ClientSession, Database};

use crate::error::AppError;

static CLIENT: OnceLock<Client> = OnceLock::new();
static DB: OnceLock<Database> = OnceLock::new();

pub async fn connect(uri: &str, name: &str) -> Result<(), AppError> {
    let client = Client::with_uri_str(uri).await?;
    let db = client.database(name);
    if CLIENT.set(client).is_err() || DB.set(db).is_err() {
        return Err(AppError::Config("database connected twice".to_string()));
    }
    tracing::info!(database = name, "connected to database");
    Ok(())
}

pub fn get_db() -> Result<Database, AppError> {
    DB.get()
        .cloned()
        .ok_or_else(|| AppError::Config("database is not available yet".to_string()))
}

pub fn get_client() -> Result<Client, AppError> {
    CLIENT
        .get()
        .cloned()
        .ok_or_else(|| AppError::Config("database is not available yet".to_string()))
}

/// Opens a session with a started transaction. Callers finish it with
/// [`finish_transaction`].
pub async fn begin_transaction() -> Result<ClientSession, AppError> {
    let mut session = get_client()?.start_session(None).await?;
    session.start_transaction(None).await?;
    Ok(session)
}

/// Commits on success and aborts on failure, returning the original outcome.
pub async fn finish_transaction<T>(
    mut session: ClientSession,
    outcome: Result<T, AppError>,
) -> Result<T, AppError> {
    match outcome {
        Ok(value) => {
            session.commit_transaction().await?;
            Ok(value)
        }
        Err(error) => {
            if let Err(abort) = session.abort_transaction().await {
                tracing::warn!(error = %abort, "transaction abort failed");
            }
            Err(error)
        }
    }
}
