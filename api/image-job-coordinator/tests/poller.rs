mod common;

use async_trait::async_trait;
use common::{ScriptedGenerator, test_state, token_for};
use image_job_coordinator::app::build_router;
use image_job_coordinator::client::{
    ClientError, CoordinatorClient, JobPoller, Progress, SlideState, StatusSource,
};
use image_job_coordinator::module::image_job::schema::{JobStatus, JobStatusView};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;

type Reply = Result<Vec<JobStatusView>, ClientError>;

/// Replays scripted replies; once exhausted, repeats the last successful one.
struct ScriptedSource {
    replies: Mutex<VecDeque<Reply>>,
    last: Mutex<Vec<JobStatusView>>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            last: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl<'a> StatusSource for &'a ScriptedSource {
    async fn fetch_status(&self, _job_ids: &[String]) -> Reply {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(Ok(views)) => {
                *self.last.lock().unwrap() = views.clone();
                Ok(views)
            }
            Some(Err(err)) => Err(err),
            None => Ok(self.last.lock().unwrap().clone()),
        }
    }
}

fn view(id: &str, status: JobStatus) -> JobStatusView {
    JobStatusView {
        id: id.to_string(),
        status,
        image_url: (status == JobStatus::Completed).then(|| format!("data:image/png;base64,{id}")),
        error_message: (status == JobStatus::Failed).then(|| "provider error".to_string()),
    }
}

#[tokio::test]
async fn transport_errors_are_retried_until_every_job_settles() {
    let source = ScriptedSource::new(vec![
        Err(ClientError::Transport("connection reset".to_string())),
        Ok(vec![view("a", JobStatus::Processing), view("b", JobStatus::Pending)]),
        Ok(vec![view("a", JobStatus::Completed), view("b", JobStatus::Failed)]),
    ]);
    let mut poller = JobPoller::new(&source, vec!["a".to_string(), "b".to_string()])
        .with_interval(Duration::from_millis(5));

    let mut seen = Vec::new();
    let progress = poller.run_with(|p| seen.push(*p)).await;

    assert_eq!(
        progress,
        Progress {
            completed: 1,
            failed: 1,
            total: 2
        }
    );
    assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].settled(), 0);
    assert_eq!(
        poller.slides(),
        vec![
            (
                0,
                SlideState::Ready {
                    image_url: "data:image/png;base64,a".to_string()
                }
            ),
            (
                1,
                SlideState::Failed {
                    reason: "provider error".to_string()
                }
            ),
        ]
    );
}

#[tokio::test]
async fn finished_poller_makes_no_more_requests() {
    let source = ScriptedSource::new(vec![Ok(vec![view("a", JobStatus::Completed)])]);
    let mut poller =
        JobPoller::new(&source, vec!["a".to_string()]).with_interval(Duration::from_millis(5));
    poller.run().await;
    poller.poll_once().await.unwrap();
    poller.run().await;
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn dropping_the_run_future_stops_polling() {
    let source = ScriptedSource::new(vec![Ok(vec![view("a", JobStatus::Processing)])]);
    let mut poller =
        JobPoller::new(&source, vec!["a".to_string()]).with_interval(Duration::from_millis(10));
    let stopped = tokio::time::timeout(Duration::from_millis(100), poller.run()).await;
    assert!(stopped.is_err());

    let calls = source.calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(source.calls.load(Ordering::SeqCst), calls);
    assert_eq!(poller.status_of("a"), Some(JobStatus::Processing));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_submits_triggers_and_polls_a_live_coordinator() {
    let state = test_state(ScriptedGenerator::new());
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        axum::serve(listener, build_router(state)).await.expect("serve");
    });

    let client = CoordinatorClient::new(format!("http://{addr}"), token_for("user-a"));
    let submitted = client
        .submit(vec!["A cat".to_string(), " ".to_string(), "A dog".to_string()])
        .await
        .expect("submit");
    assert_eq!(submitted.job_ids.len(), 2);

    client.trigger_worker().await.expect("first trigger");
    client.trigger_worker().await.expect("second trigger");

    let slides = submitted
        .results
        .iter()
        .filter_map(|r| r.job_id.clone().map(|id| (r.prompt_index, id)))
        .collect();
    let mut poller = JobPoller::with_slides(client, slides).with_interval(Duration::from_millis(20));
    let progress = tokio::time::timeout(Duration::from_secs(5), poller.run())
        .await
        .expect("poller settles");
    server.abort();

    assert_eq!(progress.completed, 2);
    let indices: Vec<usize> = poller.slides().iter().map(|(i, _)| *i).collect();
    assert_eq!(indices, vec![0, 2]);
    assert!(poller
        .slides()
        .iter()
        .all(|(_, s)| matches!(s, SlideState::Ready { .. })));
}

#[tokio::test]
async fn client_surfaces_http_errors() {
    let state = test_state(ScriptedGenerator::new());
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        axum::serve(listener, build_router(state)).await.expect("serve");
    });

    let client = CoordinatorClient::new(format!("http://{addr}"), "bogus");
    let err = client
        .fetch_status(&["x".to_string()])
        .await
        .expect_err("unauthorized");
    server.abort();

    match err {
        ClientError::Http { status, code, .. } => {
            assert_eq!(status, 401);
            assert_eq!(code.as_deref(), Some("AUTH_INVALID_TOKEN"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}
