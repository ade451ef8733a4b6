use crate::{
    connection::ConnectionManager,
    error::{codes, ClientError, Result},
    security::{generate_salt, salted_password},
    types::{ScramCredentialInfo, ScramMechanism, UserScramCredential, UserScramCredentials},
};
use bytes::Bytes;
use kafka_protocol::{
    messages::{
        alter_user_scram_credentials_request::{ScramCredentialDeletion, ScramCredentialUpsertion},
        describe_user_scram_credentials_request::UserName,
        describe_user_scram_credentials_response::DescribeUserScramCredentialsResult,
        AlterUserScramCredentialsRequest, AlterUserScramCredentialsResponse,
        DescribeUserScramCredentialsRequest,
    },
    protocol::StrBytes,
};
use std::ops::RangeInclusive;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Iteration counts the brokers accept for SCRAM credentials
pub const SCRAM_ITERATIONS: RangeInclusive<i32> = 4096..=16384;

/// Upsert, delete and describe SCRAM user credentials
#[derive(Debug, Clone)]
pub struct CredentialClient {
    connections: Arc<ConnectionManager>,
}

impl CredentialClient {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self { connections }
    }

    /// Create or replace the user's credential for its mechanism.
    ///
    /// A fresh salt is drawn on every call.
    #[instrument(skip(self, credential), fields(user = %credential.username, mechanism = %credential.mechanism))]
    pub async fn upsert(&self, credential: &UserScramCredential) -> Result<()> {
        validate(credential)?;

        let (salt, salted) = hash_password(credential).await?;

        let upsertion = ScramCredentialUpsertion::default()
            .with_name(StrBytes::from_string(credential.username.clone()))
            .with_mechanism(credential.mechanism.code())
            .with_iterations(credential.iterations)
            .with_salt(Bytes::from(salt))
            .with_salted_password(Bytes::from(salted));

        let response = self
            .connections
            .send_to_controller(
                AlterUserScramCredentialsRequest::default().with_upsertions(vec![upsertion]),
            )
            .await?;
        check_alteration(&credential.username, response)?;

        info!(iterations = credential.iterations, "SCRAM credential upserted");
        Ok(())
    }

    /// Remove the user's credential for one mechanism.
    ///
    /// Fails with [`ClientError::UserScramCredentialMissing`] when the user
    /// has no such credential.
    #[instrument(skip(self))]
    pub async fn delete(&self, username: &str, mechanism: ScramMechanism) -> Result<()> {
        let deletion = ScramCredentialDeletion::default()
            .with_name(StrBytes::from_string(username.to_string()))
            .with_mechanism(mechanism.code());

        let response = self
            .connections
            .send_to_controller(
                AlterUserScramCredentialsRequest::default().with_deletions(vec![deletion]),
            )
            .await?;
        check_alteration(username, response)?;

        info!("SCRAM credential deleted");
        Ok(())
    }

    /// Mechanisms and iteration counts registered for the user; the cluster
    /// never returns passwords.
    #[instrument(skip(self))]
    pub async fn describe(&self, username: &str) -> Result<UserScramCredentials> {
        let request = DescribeUserScramCredentialsRequest::default().with_users(Some(vec![
            UserName::default().with_name(StrBytes::from_string(username.to_string())),
        ]));

        let response = self.connections.send_to_controller(request).await?;
        ClientError::check(response.error_code, response.error_message.as_deref())?;

        let result = response
            .results
            .into_iter()
            .find(|r| r.user.as_str() == username)
            .ok_or_else(|| missing(username))?;
        credentials_from(username, result)
    }

    /// The user's credential for one mechanism
    pub async fn read(&self, username: &str, mechanism: ScramMechanism) -> Result<ScramCredentialInfo> {
        self.describe(username)
            .await?
            .mechanism(mechanism)
            .cloned()
            .ok_or_else(|| missing(username))
    }
}

fn validate(credential: &UserScramCredential) -> Result<()> {
    if credential.username.is_empty() {
        return Err(ClientError::InvalidConfig(
            "SCRAM username cannot be empty".to_string(),
        ));
    }
    if !SCRAM_ITERATIONS.contains(&credential.iterations) {
        return Err(ClientError::InvalidConfig(format!(
            "SCRAM iterations must be within {}..={}, got {}",
            SCRAM_ITERATIONS.start(),
            SCRAM_ITERATIONS.end(),
            credential.iterations
        )));
    }
    Ok(())
}

/// Draw a salt and run PBKDF2 on the blocking pool
async fn hash_password(credential: &UserScramCredential) -> Result<(Vec<u8>, Vec<u8>)> {
    let mechanism = credential.mechanism;
    let password = credential.password.clone();
    let iterations = credential.iterations as u32;

    tokio::task::spawn_blocking(move || {
        let salt = generate_salt();
        let salted = salted_password(mechanism, &password, &salt, iterations);
        (salt, salted)
    })
    .await
    .map_err(|e| ClientError::Internal(format!("SCRAM hashing task failed: {}", e)))
}

fn missing(username: &str) -> ClientError {
    ClientError::UserScramCredentialMissing {
        user: username.to_string(),
    }
}

fn check_alteration(username: &str, response: AlterUserScramCredentialsResponse) -> Result<()> {
    for result in &response.results {
        if result.error_code == codes::RESOURCE_NOT_FOUND {
            return Err(missing(username));
        }
        ClientError::check(result.error_code, result.error_message.as_deref())?;
    }
    Ok(())
}

fn credentials_from(
    username: &str,
    result: DescribeUserScramCredentialsResult,
) -> Result<UserScramCredentials> {
    if result.error_code == codes::RESOURCE_NOT_FOUND {
        return Err(missing(username));
    }
    ClientError::check(result.error_code, result.error_message.as_deref())?;

    let credentials: Vec<ScramCredentialInfo> = result
        .credential_infos
        .iter()
        .filter_map(|info| match ScramMechanism::from_code(info.mechanism) {
            Some(mechanism) => Some(ScramCredentialInfo {
                mechanism,
                iterations: info.iterations,
            }),
            None => {
                warn!(user = username, mechanism = info.mechanism, "Skipping unknown SCRAM mechanism");
                None
            }
        })
        .collect();

    if credentials.is_empty() {
        return Err(missing(username));
    }

    debug!(user = username, mechanisms = credentials.len(), "Described SCRAM credentials");
    Ok(UserScramCredentials {
        username: username.to_string(),
        credentials,
    })
}
