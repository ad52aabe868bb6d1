//! Remote procedure façade.
//!
//! One typed method per [`Method`]. Replies carrying an [`ErrorResponse`]
//! with `success = false` become [`ChannelError::Remote`], which fails the
//! call but leaves the connection alone.

use std::sync::Arc;
use std::time::Duration;

use protocol::{
    ErrorResponse, GetBaseVersionResponse, GetEnvResponse, GetHostnameResponse, Method,
    SampleInfoResponse, SetHostnameArgs, UserAuthenticateArgs, UserChangePasswordArgs,
    VerificationProgressResponse,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::client::BaseClient;
use crate::error::{ChannelError, Result};

/// Typed operations of an appliance.
pub struct BaseApi {
    client: Arc<BaseClient>,
    deadline: Option<Duration>,
}

impl BaseApi {
    /// Wraps a client. Calls have no deadline.
    pub fn new(client: Arc<BaseClient>) -> Self {
        Self {
            client,
            deadline: None,
        }
    }

    /// Applies `deadline` to every call; on expiry the connection is closed.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// The underlying client.
    pub fn client(&self) -> &Arc<BaseClient> {
        &self.client
    }

    async fn call<A, R>(&self, method: Method, args: &A) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        match self.deadline {
            Some(deadline) => self.client.call_with_deadline(method, args, deadline).await,
            None => self.client.call(method, args).await,
        }
    }

    async fn command(&self, method: Method) -> Result<()> {
        let reply: ErrorResponse = self.call(method, &()).await?;
        check(method, &reply)
    }

    /// Network and service ports of the appliance.
    pub async fn get_env(&self) -> Result<GetEnvResponse> {
        self.call(Method::GetSystemEnv, &()).await
    }

    /// Chain tip summary.
    pub async fn sample_info(&self) -> Result<SampleInfoResponse> {
        self.call(Method::GetSampleInfo, &()).await
    }

    /// Block verification progress.
    pub async fn verification_progress(&self) -> Result<VerificationProgressResponse> {
        self.call(Method::GetVerificationProgress, &()).await
    }

    /// Restarts block download from scratch.
    pub async fn resync_bitcoin(&self) -> Result<()> {
        self.command(Method::ResyncBitcoin).await
    }

    /// Rebuilds the block index.
    pub async fn reindex_bitcoin(&self) -> Result<()> {
        self.command(Method::ReindexBitcoin).await
    }

    pub async fn set_hostname(&self, hostname: &str) -> Result<()> {
        let args = SetHostnameArgs {
            hostname: hostname.to_string(),
        };
        let reply: ErrorResponse = self.call(Method::SetHostname, &args).await?;
        check(Method::SetHostname, &reply)
    }

    pub async fn hostname(&self) -> Result<String> {
        let reply: GetHostnameResponse = self.call(Method::GetHostname, &()).await?;
        check(Method::GetHostname, &reply.error_response)?;
        Ok(reply.hostname)
    }

    pub async fn user_authenticate(&self, username: &str, password: &str) -> Result<()> {
        let args = UserAuthenticateArgs {
            username: username.to_string(),
            password: password.to_string(),
        };
        let reply: ErrorResponse = self.call(Method::UserAuthenticate, &args).await?;
        check(Method::UserAuthenticate, &reply)
    }

    pub async fn user_change_password(&self, username: &str, new_password: &str) -> Result<()> {
        let args = UserChangePasswordArgs {
            username: username.to_string(),
            new_password: new_password.to_string(),
        };
        let reply: ErrorResponse = self.call(Method::UserChangePassword, &args).await?;
        check(Method::UserChangePassword, &reply)
    }

    pub async fn mount_flashdrive(&self) -> Result<()> {
        self.command(Method::MountFlashdrive).await
    }

    pub async fn unmount_flashdrive(&self) -> Result<()> {
        self.command(Method::UnmountFlashdrive).await
    }

    pub async fn backup_sysconfig(&self) -> Result<()> {
        self.command(Method::BackupSysconfig).await
    }

    pub async fn backup_hsm_secret(&self) -> Result<()> {
        self.command(Method::BackupHsmSecret).await
    }

    pub async fn restore_sysconfig(&self) -> Result<()> {
        self.command(Method::RestoreSysconfig).await
    }

    pub async fn restore_hsm_secret(&self) -> Result<()> {
        self.command(Method::RestoreHsmSecret).await
    }

    /// Software version of the appliance.
    pub async fn base_version(&self) -> Result<String> {
        let reply: GetBaseVersionResponse = self.call(Method::GetBaseVersion, &()).await?;
        check(Method::GetBaseVersion, &reply.error_response)?;
        Ok(reply.version)
    }
}

/// Turns an unsuccessful [`ErrorResponse`] into a call-level error.
fn check(method: Method, reply: &ErrorResponse) -> Result<()> {
    if reply.success {
        return Ok(());
    }
    let message = match (reply.message.is_empty(), reply.code.is_empty()) {
        (true, true) => "unspecified failure".to_string(),
        (false, true) => reply.message.clone(),
        (true, false) => reply.code.clone(),
        (false, false) => format!("{} ({})", reply.message, reply.code),
    };
    Err(ChannelError::Remote {
        method: method.wire_name().to_string(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;

    #[test]
    fn test_check_success() {
        assert!(check(Method::ResyncBitcoin, &ErrorResponse::ok()).is_ok());
    }

    #[test]
    fn test_check_failure_is_call_level() {
        let reply = ErrorResponse::failure("EXECUTABLE_FAILED", "systemctl exited with 1");
        let err = check(Method::ResyncBitcoin, &reply).unwrap_err();

        assert_eq!(err.class(), ErrorClass::Call);
        assert_eq!(
            err.to_string(),
            "RPCServer.ResyncBitcoin failed: systemctl exited with 1 (EXECUTABLE_FAILED)"
        );
    }

    #[test]
    fn test_check_failure_without_details() {
        let err = check(Method::MountFlashdrive, &ErrorResponse::default()).unwrap_err();
        assert!(err.to_string().ends_with("unspecified failure"));
    }
}
