use crate::controller::{Controller, ControllerError};
use rollcall_core::{AttendanceStatus, NewStudent, RosterError, SessionError};
use serde::Serialize;
use zbus::fdo;
use zbus::interface;

/// D-Bus interface for the Rollcall attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
pub struct AttendanceService {
    controller: Controller,
}

impl AttendanceService {
    pub fn new(controller: Controller) -> Self {
        Self { controller }
    }
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceService {
    /// Start an operator session. Both fields must be non-empty.
    async fn login(&self, operator: &str, secret: &str) -> fdo::Result<()> {
        tracing::info!(operator, "login requested");
        self.controller.login(operator, secret).await.map_err(to_fdo)
    }

    /// End the operator session, discarding any draft.
    async fn logout(&self) -> fdo::Result<()> {
        tracing::info!("logout requested");
        self.controller.logout().await;
        Ok(())
    }

    /// Class sections with dashboard progress, as JSON.
    async fn list_classes(&self) -> fdo::Result<String> {
        to_json(&self.controller.dashboard())
    }

    /// Select a class, capture a still and start analysis. Returns session status JSON.
    async fn select_class(&self, class_id: &str) -> fdo::Result<String> {
        tracing::info!(class_id, "select_class requested");
        let status = self.controller.select_class(class_id).await.map_err(to_fdo)?;
        to_json(&status)
    }

    /// Discard the draft and capture a new still.
    async fn retake(&self) -> fdo::Result<String> {
        tracing::info!("retake requested");
        let status = self.controller.retake().await.map_err(to_fdo)?;
        to_json(&status)
    }

    /// Block until the outstanding analysis completes. Returns session status JSON.
    async fn await_analysis(&self) -> fdo::Result<String> {
        to_json(&self.controller.await_analysis().await)
    }

    /// The draft under review, as JSON.
    async fn review(&self) -> fdo::Result<String> {
        let review = self.controller.review().await.map_err(to_fdo)?;
        to_json(&review)
    }

    /// Flip one student between present and absent. False if the id is unknown.
    async fn toggle(&self, student_id: &str) -> fdo::Result<bool> {
        self.controller.toggle(student_id).await.map_err(to_fdo)
    }

    async fn mark_all(&self, status: &str) -> fdo::Result<()> {
        let status: AttendanceStatus = status.parse().map_err(fdo::Error::InvalidArgs)?;
        self.controller.mark_all(status).await.map_err(to_fdo)
    }

    async fn unmark_all(&self) -> fdo::Result<()> {
        self.controller.unmark_all().await.map_err(to_fdo)
    }

    /// Add a student missed by recognition. An empty `photo_url` gets a generated avatar.
    async fn add_student(
        &self,
        name: &str,
        roll_number: &str,
        photo_url: &str,
    ) -> fdo::Result<String> {
        let new = NewStudent {
            name: name.to_string(),
            roll_number: roll_number.to_string(),
            photo_url: Some(photo_url.to_string()).filter(|p| !p.is_empty()),
        };
        let student = self.controller.add_student(new).await.map_err(to_fdo)?;
        to_json(&student)
    }

    /// Write the draft to the roster. Returns the commit receipt as JSON.
    async fn commit(&self) -> fdo::Result<String> {
        let receipt = self.controller.commit().await.map_err(to_fdo)?;
        to_json(&receipt)
    }

    /// Abandon the session without committing.
    async fn cancel(&self) -> fdo::Result<()> {
        self.controller.cancel().await;
        Ok(())
    }

    /// Return daemon and session status information.
    async fn status(&self) -> fdo::Result<String> {
        let session = self.controller.status().await;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "session": session,
        })
        .to_string())
    }
}

fn to_json<T: Serialize>(value: &T) -> fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| fdo::Error::Failed(e.to_string()))
}

fn to_fdo(err: ControllerError) -> fdo::Error {
    let message = err.to_string();
    match err {
        ControllerError::Session(SessionError::Validation(_)) => fdo::Error::InvalidArgs(message),
        ControllerError::Session(SessionError::MissingCredentials) => fdo::Error::AuthFailed(message),
        ControllerError::Session(SessionError::NotAuthenticated) => fdo::Error::AccessDenied(message),
        ControllerError::Session(SessionError::Roster(RosterError::SectionNotFound(_))) => {
            fdo::Error::UnknownObject(message)
        }
        ControllerError::Capture(_) => fdo::Error::IOError(message),
        ControllerError::Session(_) => fdo::Error::Failed(message),
    }
}
