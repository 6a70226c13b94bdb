//! Prompt and message text must never reach logs or error strings, even on failure.

mod common;

use std::io;
use std::sync::{Arc, Mutex};

use session_autopilot::jobs::model::CreateJobRequest;
use session_autopilot::jobs::{JobService, JobStatus};
use session_autopilot::session::SessionState;
use session_autopilot::session::model::{AutomationMode, CreateSessionRequest};
use session_autopilot::store::Database;
use session_autopilot::worker::{
    AutoContinueWorker, AutoRetryWorker, BackgroundJobWorker, TaskPool,
};

use common::*;

const SECRET: &str = "SECRET-7f3a-do-not-log";

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn capture() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter("session_autopilot=trace")
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (logs, guard)
}

fn secret_prompt() -> String {
    format!("Rotate the credentials: {SECRET}")
}

fn assert_clean(text: &str) {
    assert!(!text.contains(SECRET), "secret leaked into: {text}");
}

async fn set_messages(db: &Arc<dyn Database>) {
    let mut settings = db.get_settings("default").await.unwrap();
    settings.auto_continue_message = secret_prompt();
    settings.auto_retry_message = secret_prompt();
    db.put_settings("default", &settings).await.unwrap();
}

#[tokio::test]
async fn failed_session_creation_logs_ids_only() {
    let (logs, _guard) = capture();
    let db = memory_db().await;
    let remote = FakeRemote::new();
    *remote.fail_create_from.lock().unwrap() = Some(0);
    let sessions = sessions_with(db.clone(), remote.clone());
    let jobs = JobService::new(db.clone());

    let job = jobs
        .create_job(&CreateJobRequest {
            name: Some(SECRET.into()),
            repo: "octo/hello".into(),
            branch: "main".into(),
            prompt: secret_prompt(),
            session_count: 2,
            ..Default::default()
        })
        .await
        .unwrap();

    BackgroundJobWorker::new(db.clone(), sessions.clone(), TaskPool::new(1), "default")
        .run_once()
        .await
        .unwrap();
    assert_eq!(jobs.get_job(job.id).await.unwrap().status, JobStatus::Failed);

    let err = sessions
        .create_session(&CreateSessionRequest {
            name: None,
            prompt: secret_prompt(),
            repo: "octo/hello".into(),
            branch: "main".into(),
            profile_id: None,
            require_plan_approval: false,
            automation_mode: AutomationMode::default(),
        })
        .await
        .unwrap_err();
    assert_clean(&err.to_string());
    assert_clean(&format!("{err:?}"));

    let text = logs.text();
    assert!(text.contains(&job.id.to_string()));
    assert_clean(&text);
}

#[tokio::test]
async fn rejected_input_errors_do_not_echo_the_value() {
    let db = memory_db().await;
    let sessions = sessions_with(db.clone(), FakeRemote::new());

    let oversized = SECRET.repeat(5_000);
    let err = sessions
        .create_session(&CreateSessionRequest {
            name: None,
            prompt: oversized,
            repo: "octo/hello".into(),
            branch: "main".into(),
            profile_id: None,
            require_plan_approval: false,
            automation_mode: AutomationMode::default(),
        })
        .await
        .unwrap_err();
    assert_clean(&err.to_string());
    assert_clean(&format!("{err:?}"));

    let err = sessions
        .create_session(&CreateSessionRequest {
            name: None,
            prompt: secret_prompt(),
            repo: format!("not a repo {SECRET}"),
            branch: "main".into(),
            profile_id: None,
            require_plan_approval: false,
            automation_mode: AutomationMode::default(),
        })
        .await
        .unwrap_err();
    assert_clean(&err.to_string());
    assert_clean(&format!("{err:?}"));
}

#[tokio::test]
async fn failed_sends_log_failure_class_only() {
    let (logs, _guard) = capture();
    let db = memory_db().await;
    set_messages(&db).await;
    let remote = FakeRemote::new();
    *remote.fail_send_status.lock().unwrap() = Some(500);

    let mut completed = remote_session("s1", SessionState::Completed);
    completed.messages = vec![human("start"), ai(SECRET)];
    remote.put(completed);
    db.insert_session(&local_session("s1", SessionState::Completed))
        .await
        .unwrap();
    db.insert_session(&local_session("s2", SessionState::Failed))
        .await
        .unwrap();

    let sessions = sessions_with(db.clone(), remote.clone());
    AutoContinueWorker::new(db.clone(), sessions.clone(), "default")
        .run_once()
        .await
        .unwrap();
    AutoRetryWorker::new(db.clone(), sessions.clone(), None, "default")
        .run_once()
        .await
        .unwrap();

    let err = sessions.send_message("s1", &secret_prompt()).await.unwrap_err();
    assert_clean(&err.to_string());
    assert_clean(&format!("{err:?}"));

    let stored = db.get_session("s2").await.unwrap().unwrap();
    assert_eq!(stored.last_error.as_deref(), Some("remote_transient"));

    let text = logs.text();
    assert!(text.contains("s2"));
    assert_clean(&text);
}
