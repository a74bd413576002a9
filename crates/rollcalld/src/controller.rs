//! Async session controller.
//!
//! Wraps the [`Session`] state machine with the I/O it coordinates: the
//! capture engine, the recognition client and the roster store. The
//! recognition call runs on a spawned task; its outcome is handed back to
//! the session, which discards it if the operator has moved on.

use crate::engine::{EngineError, EngineHandle};
use rollcall_core::{
    Analysis, AnalysisTicket, AttendanceStatus, CaptureTicket, CommitReceipt, Completion, NewStudent, RosterStore,
    Session, SessionError, SessionStatus, Student,
};
use rollcall_vision::Recognizer;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("camera unavailable: {0}")]
    Capture(#[from] EngineError),
}

/// One row of the class list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassOverview {
    pub id: String,
    pub name: String,
    pub grade: String,
    pub total_students: u32,
    pub loaded: usize,
    pub marked: u32,
    pub progress: f32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub total_present: usize,
    pub classes: Vec<ClassOverview>,
}

/// The draft under review, with the analysis that produced it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub class_id: Option<String>,
    pub image_bytes: usize,
    pub analysis: Option<Analysis>,
    pub total: usize,
    pub present: usize,
    pub students: Vec<Student>,
}

struct Inner {
    session: Mutex<Session>,
    store: Arc<RosterStore>,
    engine: EngineHandle,
    recognizer: Arc<dyn Recognizer>,
    pending: Mutex<Option<JoinHandle<Completion>>>,
}

/// Clone-safe handle to the operator session.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
}

impl Controller {
    pub fn new(
        store: Arc<RosterStore>,
        engine: EngineHandle,
        recognizer: Arc<dyn Recognizer>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                session: Mutex::new(Session::new()),
                store,
                engine,
                recognizer,
                pending: Mutex::new(None),
            }),
        }
    }

    pub async fn login(&self, operator: &str, secret: &str) -> Result<(), ControllerError> {
        Ok(self.inner.session.lock().await.login(operator, secret)?)
    }

    pub async fn logout(&self) {
        self.inner.session.lock().await.logout();
    }

    pub async fn status(&self) -> SessionStatus {
        self.inner.session.lock().await.status()
    }

    pub fn dashboard(&self) -> Dashboard {
        let store = &self.inner.store;
        let classes = store
            .sections()
            .into_iter()
            .map(|section| {
                let progress = store.progress(&section.id).ok();
                ClassOverview {
                    loaded: section.students.len(),
                    marked: progress.map(|p| p.marked).unwrap_or(0),
                    progress: progress.map(|p| p.ratio()).unwrap_or(0.0),
                    id: section.id,
                    name: section.name,
                    grade: section.grade,
                    total_students: section.total_students,
                }
            })
            .collect();
        Dashboard {
            total_present: store.total_present(),
            classes,
        }
    }

    /// Select a class and immediately capture and analyse a still.
    pub async fn select_class(&self, class_id: &str) -> Result<SessionStatus, ControllerError> {
        let capture = {
            let mut session = self.inner.session.lock().await;
            if session.operator().is_none() {
                return Err(SessionError::NotAuthenticated.into());
            }
            self.inner.store.get_section(class_id).map_err(SessionError::from)?;
            session.select_class(class_id)?;
            session.begin_capture()?
        };
        self.capture_and_analyze(capture).await
    }

    /// Discard the draft and capture again.
    pub async fn retake(&self) -> Result<SessionStatus, ControllerError> {
        let capture = self.inner.session.lock().await.retake()?;
        self.capture_and_analyze(capture).await
    }

    /// Fulfil `capture`. The session lock is not held while the camera
    /// works; a still for a request the session has moved past is dropped.
    async fn capture_and_analyze(
        &self,
        capture: CaptureTicket,
    ) -> Result<SessionStatus, ControllerError> {
        let captured = self.inner.engine.capture().await;

        let mut session = self.inner.session.lock().await;
        let image = match captured {
            Ok(image) => image,
            Err(e) => {
                session.capture_failed(&capture);
                return Err(e.into());
            }
        };

        let snapshot = match self.inner.store.get_section(&capture.class_id) {
            Ok(section) => section.students,
            Err(e) => {
                session.capture_failed(&capture);
                return Err(SessionError::from(e).into());
            }
        };
        let Some(ticket) = session.capture_succeeded(&capture, image.clone(), snapshot.clone())?
        else {
            return Ok(session.status());
        };
        let status = session.status();
        drop(session);

        let task = tokio::spawn(run_analysis(self.inner.clone(), ticket, image, snapshot));
        *self.inner.pending.lock().await = Some(task);
        Ok(status)
    }

    /// Wait for the outstanding recognition call, if any, and report the session.
    pub async fn await_analysis(&self) -> SessionStatus {
        let task = self.inner.pending.lock().await.take();
        if let Some(task) = task {
            match task.await {
                Ok(completion) => tracing::debug!(?completion, "analysis task joined"),
                Err(e) => tracing::warn!(error = %e, "analysis task failed"),
            }
        }
        self.status().await
    }

    pub async fn review(&self) -> Result<Review, ControllerError> {
        let session = self.inner.session.lock().await;
        let draft = session.draft()?;
        let summary = draft.summary();
        Ok(Review {
            class_id: session.class_id().map(str::to_string),
            image_bytes: session.image().map(|i| i.len()).unwrap_or(0),
            analysis: session.analysis().cloned(),
            total: summary.total,
            present: summary.present,
            students: draft.students().to_vec(),
        })
    }

    pub async fn toggle(&self, student_id: &str) -> Result<bool, ControllerError> {
        Ok(self.inner.session.lock().await.toggle(student_id)?)
    }

    pub async fn mark_all(&self, status: AttendanceStatus) -> Result<(), ControllerError> {
        Ok(self.inner.session.lock().await.mark_all(status)?)
    }

    pub async fn unmark_all(&self) -> Result<(), ControllerError> {
        Ok(self.inner.session.lock().await.unmark_all()?)
    }

    pub async fn add_student(&self, new: NewStudent) -> Result<Student, ControllerError> {
        Ok(self.inner.session.lock().await.add_student(new)?)
    }

    pub async fn commit(&self) -> Result<CommitReceipt, ControllerError> {
        let mut session = self.inner.session.lock().await;
        Ok(session.commit(&self.inner.store)?)
    }

    pub async fn cancel(&self) {
        self.inner.session.lock().await.cancel();
    }
}

async fn run_analysis(
    inner: Arc<Inner>,
    ticket: AnalysisTicket,
    image: rollcall_core::CapturedImage,
    snapshot: Vec<Student>,
) -> Completion {
    let analysis = inner.recognizer.analyze(&image, &snapshot).await;
    let completion = inner.session.lock().await.complete_analysis(ticket, analysis);
    tracing::debug!(attempt = ticket.attempt, ?completion, "analysis delivered");
    completion
}
