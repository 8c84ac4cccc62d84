//! Per-connection session handling.
//!
//! ```text
//!   OPEN ─▶ READING ──(Finish / EOF / bad frame)──▶ DRAINING ─▶ CLOSED
//!              │                                        ▲
//!              └──(read error / write failure)──────────┴─▶ torn down
//! ```
//!
//! The read loop validates and admits each request, then hands the job to the
//! worker pool. Completions run on worker threads and queue their result for
//! one writer task, which owns the write half and is the only thing that ever
//! writes to the socket. Each request takes a session permit that travels with
//! its job and its result, and the writer drops it once the frame is written.
//! Outstanding jobs plus unwritten results therefore never exceed the session
//! ceiling, and draining reacquires every permit only after the last result is
//! on the wire.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use ocrforge_core::{
    clip_image_id, read_frame, write_frame, ClientFrame, CloseStatus, FrameError, Job, JobRequest,
    JobResult, ServerFrame, EMPTY_IMAGE_DATA, IMAGE_ID_TOO_LONG, MAX_IMAGE_ID_LEN,
    RECOGNITION_FAILED, RESULT_TOO_LARGE,
};
use ocrforge_executor::{RecognizerPool, WorkerPool};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::error::SessionError;
use crate::governor::{AdmissionPermit, ResourceGovernor};
use crate::stats::ServerStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    /// Largest accepted frame, inbound and outbound
    pub max_message_size: usize,
    /// Outstanding jobs per session before the read side stops reading
    pub max_in_flight: usize,
}

/// How a session that reached `CLOSED` ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub session_id: u64,
    pub admitted: u64,
    pub rejected: u64,
    pub status: CloseStatus,
}

#[derive(Debug, Default)]
struct SessionCounts {
    admitted: u64,
    rejected: u64,
}

pub struct SessionHandler {
    workers: Arc<WorkerPool>,
    recognizers: Arc<RecognizerPool>,
    governor: Arc<ResourceGovernor>,
    stats: Arc<ServerStats>,
    limits: SessionLimits,
    next_id: AtomicU64,
}

impl SessionHandler {
    pub fn new(
        workers: Arc<WorkerPool>,
        recognizers: Arc<RecognizerPool>,
        governor: Arc<ResourceGovernor>,
        stats: Arc<ServerStats>,
        limits: SessionLimits,
    ) -> Self {
        let limits = SessionLimits {
            max_in_flight: limits.max_in_flight.max(1),
            ..limits
        };
        Self {
            workers,
            recognizers,
            governor,
            stats,
            limits,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn limits(&self) -> SessionLimits {
        self.limits
    }

    pub fn stats(&self) -> &Arc<ServerStats> {
        &self.stats
    }

    pub fn workers(&self) -> &Arc<WorkerPool> {
        &self.workers
    }

    /// Run one session to completion.
    ///
    /// Returns a summary once the close frame has been written. Transport
    /// failures and degraded sessions return an error instead; results of
    /// tasks still running at that point are discarded.
    pub async fn handle<S>(&self, stream: S, peer: String) -> Result<SessionSummary, SessionError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let session_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let span = info_span!("session", session_id, peer = %peer);
        self.run(session_id, stream).instrument(span).await
    }

    async fn run<S>(&self, session_id: u64, stream: S) -> Result<SessionSummary, SessionError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let started = Instant::now();
        self.stats.sessions_opened.inc();
        info!("Session opened");

        let (mut reader, writer) = tokio::io::split(stream);
        let (tx, rx) = mpsc::unbounded_channel();
        let degraded = CancellationToken::new();
        let writer_task = tokio::spawn(write_loop(
            writer,
            rx,
            self.limits.max_message_size,
            degraded.clone(),
        ));

        let ceiling = self.limits.max_in_flight;
        let in_flight = Arc::new(Semaphore::new(ceiling));
        let mut counts = SessionCounts::default();

        // READING
        let ended: Result<(), SessionError> = loop {
            let frame = tokio::select! {
                biased;
                _ = degraded.cancelled() => break Err(SessionError::Degraded),
                frame = read_frame::<_, ClientFrame>(&mut reader, self.limits.max_message_size) => frame,
            };

            let request = match frame {
                Ok(Some(ClientFrame::Submit(request))) => request,
                Ok(Some(ClientFrame::Finish)) => {
                    debug!("Client finished submitting");
                    break Ok(());
                }
                Ok(None) => {
                    debug!("Client closed its write side");
                    break Ok(());
                }
                Err(e) => break Err(SessionError::from(e)),
            };

            let screened = self.screen(request);

            // Backpressure: every outstanding job and every unwritten result
            // holds a permit, so a peer that stops reading stalls this loop.
            let permit = match acquire(&in_flight, &degraded).await {
                Ok(permit) => permit,
                Err(e) => break Err(e),
            };

            let (job, admission) = match screened {
                Ok(admitted) => admitted,
                Err(rejection) => {
                    self.reject(session_id, rejection, permit, &tx, &mut counts);
                    continue;
                }
            };

            counts.admitted += 1;
            self.stats.jobs_admitted.inc();
            if let Err(refused) = self.dispatch(session_id, job, admission, permit, &tx) {
                let permit = match acquire(&in_flight, &degraded).await {
                    Ok(permit) => permit,
                    Err(e) => break Err(e),
                };
                self.stats.jobs_failed.inc();
                send(&tx, JobResult::failure(refused.job_id, refused.reason), permit);
            }
        };

        let status = match ended {
            Ok(()) => CloseStatus::Ok,
            Err(SessionError::Protocol(e)) => {
                warn!(error = %e, "Protocol violation; draining session");
                CloseStatus::error(format!("protocol violation: {e}"))
            }
            Err(e) => return Err(self.tear_down(e, writer_task, started, &counts)),
        };

        // DRAINING: permits come back only once each result has been written.
        let ceiling = u32::try_from(ceiling).unwrap_or(u32::MAX);
        tokio::select! {
            biased;
            _ = degraded.cancelled() => {
                return Err(self.tear_down(SessionError::Degraded, writer_task, started, &counts));
            }
            _ = in_flight.acquire_many(ceiling) => {}
        }

        let _ = tx.send(Outbound {
            frame: ServerFrame::Close(status.clone()),
            _permit: None,
        });
        drop(tx);
        match writer_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to deliver close frame");
                return Err(self.finish_torn_down(SessionError::Degraded, started, &counts));
            }
            Err(join) => {
                warn!(error = %join, "Session writer task failed");
                return Err(self.finish_torn_down(SessionError::Degraded, started, &counts));
            }
        }

        // CLOSED
        self.stats.sessions_closed.inc();
        info!(
            admitted = counts.admitted,
            rejected = counts.rejected,
            ok = status.is_ok(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Session closed"
        );
        Ok(SessionSummary {
            session_id,
            admitted: counts.admitted,
            rejected: counts.rejected,
            status,
        })
    }

    /// Validate and admit one request.
    ///
    /// A rejected request never becomes a task and never reaches the engine.
    fn screen(&self, request: JobRequest) -> Result<(Job, AdmissionPermit), Rejection> {
        let job = Job::from(request);

        if job.id.len() > MAX_IMAGE_ID_LEN {
            return Err(Rejection::new(clip_image_id(&job.id), IMAGE_ID_TOO_LONG));
        }
        if job.payload.is_empty() {
            return Err(Rejection::new(&job.id, EMPTY_IMAGE_DATA));
        }

        match self.governor.try_admit(job.size()) {
            Ok(admission) => Ok((job, admission)),
            Err(e) => Err(Rejection::new(&job.id, e.to_string())),
        }
    }

    fn reject(
        &self,
        session_id: u64,
        rejection: Rejection,
        permit: OwnedSemaphorePermit,
        tx: &UnboundedSender<Outbound>,
        counts: &mut SessionCounts,
    ) {
        debug!(
            session_id,
            job_id = %rejection.job_id,
            reason = %rejection.reason,
            "Job rejected"
        );
        counts.rejected += 1;
        self.stats.jobs_rejected.inc();
        send(tx, JobResult::failure(rejection.job_id, rejection.reason), permit);
    }

    /// Bind the job to a recognizer slot and queue it on the worker pool.
    ///
    /// The task carries the session permit through to the writer, which drops
    /// it once the result is on the wire. If the pool refuses the job, the
    /// permit is gone with the task and the caller answers the job itself.
    fn dispatch(
        &self,
        session_id: u64,
        job: Job,
        admission: AdmissionPermit,
        permit: OwnedSemaphorePermit,
        tx: &UnboundedSender<Outbound>,
    ) -> Result<(), Rejection> {
        let slot = self.recognizers.acquire_slot();
        let job_id = job.id.clone();
        let task = {
            let recognizers = Arc::clone(&self.recognizers);
            let stats = Arc::clone(&self.stats);
            let tx = tx.clone();
            move || {
                let recognition = recognizers.run(slot, &job.payload);
                drop(admission);
                let result = match recognition.outcome {
                    Ok(text) => JobResult::from_text(&job.id, text),
                    Err(e) => {
                        warn!(
                            session_id,
                            job_id = %job.id,
                            slot = recognition.slot,
                            generation = recognition.generation,
                            error = %e,
                            "Recognition failed"
                        );
                        JobResult::failure(&job.id, RECOGNITION_FAILED)
                    }
                };

                if result.success {
                    stats.jobs_succeeded.inc();
                } else {
                    stats.jobs_failed.inc();
                }
                if !send(&tx, result, permit) {
                    stats.results_discarded.inc();
                    debug!(session_id, job_id = %job.id, "Session gone; result discarded");
                }
            }
        };

        self.workers.submit(task).map_err(|e| {
            warn!(session_id, job_id = %job_id, error = %e, "Worker pool refused job");
            Rejection::new(job_id, e.to_string())
        })
    }

    fn tear_down(
        &self,
        err: SessionError,
        writer_task: tokio::task::JoinHandle<Result<(), FrameError>>,
        started: Instant,
        counts: &SessionCounts,
    ) -> SessionError {
        writer_task.abort();
        self.finish_torn_down(err, started, counts)
    }

    fn finish_torn_down(
        &self,
        err: SessionError,
        started: Instant,
        counts: &SessionCounts,
    ) -> SessionError {
        self.stats.sessions_closed.inc();
        warn!(
            error = %err,
            admitted = counts.admitted,
            rejected = counts.rejected,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Session torn down"
        );
        err
    }
}

/// A frame queued for the writer. Results keep their session permit until
/// the frame has been written.
struct Outbound {
    frame: ServerFrame,
    _permit: Option<OwnedSemaphorePermit>,
}

/// An immediate failure answer for a request that was not run.
struct Rejection {
    job_id: String,
    reason: String,
}

impl Rejection {
    fn new(job_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            reason: reason.into(),
        }
    }
}

/// Queue a result. Returns false when the writer is gone.
fn send(tx: &UnboundedSender<Outbound>, result: JobResult, permit: OwnedSemaphorePermit) -> bool {
    tx.send(Outbound {
        frame: ServerFrame::Result(result),
        _permit: Some(permit),
    })
    .is_ok()
}

async fn acquire(
    in_flight: &Arc<Semaphore>,
    degraded: &CancellationToken,
) -> Result<OwnedSemaphorePermit, SessionError> {
    tokio::select! {
        biased;
        _ = degraded.cancelled() => Err(SessionError::Degraded),
        permit = Arc::clone(in_flight).acquire_owned() => {
            permit.map_err(|_| SessionError::Degraded)
        }
    }
}

/// The session's single writer. Stops after the close frame or on the first
/// failed write, which marks the session degraded.
///
/// A result too large for one frame is replaced by a failure for the same
/// job, so one oversized answer does not cost the rest of the session.
async fn write_loop<W>(
    mut writer: W,
    mut rx: UnboundedReceiver<Outbound>,
    limit: usize,
    degraded: CancellationToken,
) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(outbound) = rx.recv().await {
        let closing = matches!(outbound.frame, ServerFrame::Close(_));
        let written = match write_frame(&mut writer, &outbound.frame, limit).await {
            Err(FrameError::TooLarge { size, .. }) => match &outbound.frame {
                ServerFrame::Result(result) => {
                    let image_id = clip_image_id(&result.image_id);
                    warn!(image_id, size, limit, "Result exceeds frame limit; sending failure instead");
                    let fallback = ServerFrame::Result(JobResult::failure(image_id, RESULT_TOO_LARGE));
                    write_frame(&mut writer, &fallback, limit).await
                }
                ServerFrame::Close(_) => Err(FrameError::TooLarge { size, limit }),
            },
            other => other,
        };
        if let Err(e) = written {
            degraded.cancel();
            return Err(e);
        }
        drop(outbound);
        if closing {
            let _ = writer.shutdown().await;
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocrforge_core::{RecognizeError, Recognizer, RecognizerFactory};
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::io::{AsyncWriteExt, DuplexStream};

    const LIMIT: usize = 1024 * 1024;

    #[derive(Clone, Default)]
    struct Probe {
        calls: Arc<AtomicUsize>,
        live: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    /// Upper-cases the payload after a short pause; `b"blank"` yields no text.
    /// A payload `wait-<ms>` pauses for that long instead, and `b"verbose"`
    /// answers with far more text than it was given.
    struct Upper {
        probe: Probe,
        delay: Duration,
    }

    impl Recognizer for Upper {
        fn recognize(&mut self, image: &[u8]) -> Result<String, RecognizeError> {
            self.probe.calls.fetch_add(1, Ordering::SeqCst);
            let live = self.probe.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.probe.peak.fetch_max(live, Ordering::SeqCst);
            let pause = std::str::from_utf8(image)
                .ok()
                .and_then(|s| s.strip_prefix("wait-"))
                .and_then(|ms| ms.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(self.delay);
            std::thread::sleep(pause);
            self.probe.live.fetch_sub(1, Ordering::SeqCst);

            match image {
                b"blank" => Ok(String::new()),
                b"broken" => Err(RecognizeError::Engine("corrupt image".into())),
                b"verbose" => Ok("VERBOSE ".repeat(100)),
                _ => Ok(String::from_utf8_lossy(image).to_uppercase()),
            }
        }
    }

    struct Setup {
        threads: usize,
        ceiling: usize,
        max_bytes: u64,
        max_jobs: usize,
        delay: Duration,
        limit: usize,
    }

    impl Default for Setup {
        fn default() -> Self {
            Self {
                threads: 4,
                ceiling: 4,
                max_bytes: 1 << 20,
                max_jobs: 64,
                delay: Duration::from_millis(1),
                limit: LIMIT,
            }
        }
    }

    fn handler(setup: Setup, probe: &Probe) -> Arc<SessionHandler> {
        let factory: Arc<dyn RecognizerFactory> = {
            let probe = probe.clone();
            let delay = setup.delay;
            Arc::new(move || -> Result<Box<dyn Recognizer>, RecognizeError> {
                Ok(Box::new(Upper {
                    probe: probe.clone(),
                    delay,
                }))
            })
        };
        Arc::new(SessionHandler::new(
            Arc::new(WorkerPool::new(setup.threads).unwrap()),
            Arc::new(RecognizerPool::new(factory, setup.threads).unwrap()),
            Arc::new(ResourceGovernor::new(setup.max_bytes, setup.max_jobs)),
            Arc::new(ServerStats::new()),
            SessionLimits {
                max_message_size: setup.limit,
                max_in_flight: setup.ceiling,
            },
        ))
    }

    fn spawn_session(
        handler: &Arc<SessionHandler>,
    ) -> (
        DuplexStream,
        tokio::task::JoinHandle<Result<SessionSummary, SessionError>>,
    ) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let handler = Arc::clone(handler);
        let task = tokio::spawn(async move { handler.handle(server, "test".into()).await });
        (client, task)
    }

    async fn submit(client: &mut DuplexStream, id: &str, data: &[u8]) {
        let frame = ClientFrame::Submit(JobRequest::new(id, format!("{id}.png"), data));
        write_frame(client, &frame, LIMIT).await.unwrap();
    }

    /// Read every frame up to and including the close frame.
    async fn collect(client: &mut DuplexStream) -> (Vec<JobResult>, CloseStatus) {
        let mut results = Vec::new();
        loop {
            match read_frame::<_, ServerFrame>(client, LIMIT).await.unwrap() {
                Some(ServerFrame::Result(result)) => results.push(result),
                Some(ServerFrame::Close(status)) => return (results, status),
                None => panic!("stream ended without a close frame"),
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn every_admitted_job_gets_exactly_one_result_before_close() {
        let probe = Probe::default();
        let handler = handler(Setup::default(), &probe);
        let (mut client, session) = spawn_session(&handler);

        let ids: HashSet<String> = (0..40).map(|i| format!("img-{i}")).collect();
        for id in &ids {
            submit(&mut client, id, id.as_bytes()).await;
        }
        write_frame(&mut client, &ClientFrame::Finish, LIMIT).await.unwrap();

        let (results, status) = collect(&mut client).await;
        assert_eq!(status, CloseStatus::Ok);
        assert_eq!(results.len(), 40);
        let seen: HashSet<String> = results.iter().map(|r| r.image_id.clone()).collect();
        assert_eq!(seen, ids);
        assert!(results.iter().all(|r| r.success && r.extracted_text == r.image_id.to_uppercase()));

        let summary = session.await.unwrap().unwrap();
        assert_eq!(summary.admitted, 40);
        assert_eq!(summary.rejected, 0);
        assert_eq!(handler.stats().jobs_succeeded.get(), 40);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn empty_payload_is_rejected_and_valid_one_succeeds() {
        let probe = Probe::default();
        let handler = handler(Setup::default(), &probe);
        let (mut client, session) = spawn_session(&handler);

        submit(&mut client, "a", b"valid").await;
        submit(&mut client, "b", b"").await;
        write_frame(&mut client, &ClientFrame::Finish, LIMIT).await.unwrap();

        let (mut results, status) = collect(&mut client).await;
        results.sort_by(|x, y| x.image_id.cmp(&y.image_id));
        assert!(status.is_ok());
        assert_eq!(results, vec![
            JobResult {
                image_id: "a".into(),
                extracted_text: "VALID".into(),
                success: true,
                error_message: String::new(),
            },
            JobResult {
                image_id: "b".into(),
                extracted_text: String::new(),
                success: false,
                error_message: "Empty image data".into(),
            },
        ]);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
        session.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn identical_payloads_produce_independent_results() {
        let probe = Probe::default();
        let handler = handler(Setup::default(), &probe);
        let (mut client, _session) = spawn_session(&handler);

        submit(&mut client, "first", b"same").await;
        submit(&mut client, "second", b"same").await;
        write_frame(&mut client, &ClientFrame::Finish, LIMIT).await.unwrap();

        let (results, _) = collect(&mut client).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.extracted_text == "SAME"));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn over_budget_job_fails_without_touching_the_engine() {
        let probe = Probe::default();
        let handler = handler(
            Setup {
                max_bytes: 8,
                ..Setup::default()
            },
            &probe,
        );
        let (mut client, session) = spawn_session(&handler);

        submit(&mut client, "huge", b"way more than eight bytes").await;
        write_frame(&mut client, &ClientFrame::Finish, LIMIT).await.unwrap();

        let (results, status) = collect(&mut client).await;
        assert!(status.is_ok());
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert_eq!(results[0].error_message, "In-flight byte budget exceeded");
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);

        let summary = session.await.unwrap().unwrap();
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.admitted, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn session_ceiling_bounds_concurrent_execution() {
        let probe = Probe::default();
        let handler = handler(
            Setup {
                threads: 4,
                ceiling: 2,
                delay: Duration::from_millis(20),
                ..Setup::default()
            },
            &probe,
        );
        let (mut client, _session) = spawn_session(&handler);

        for i in 0..3 {
            submit(&mut client, &format!("job-{i}"), b"text").await;
        }
        write_frame(&mut client, &ClientFrame::Finish, LIMIT).await.unwrap();

        let (results, status) = collect(&mut client).await;
        assert!(status.is_ok());
        assert_eq!(results.len(), 3);
        assert!(probe.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn engine_failures_become_failed_results() {
        let probe = Probe::default();
        let handler = handler(Setup::default(), &probe);
        let (mut client, _session) = spawn_session(&handler);

        submit(&mut client, "blank", b"blank").await;
        submit(&mut client, "broken", b"broken").await;
        write_frame(&mut client, &ClientFrame::Finish, LIMIT).await.unwrap();

        let (results, status) = collect(&mut client).await;
        assert!(status.is_ok());
        assert_eq!(results.len(), 2);
        for result in results {
            assert!(!result.success);
            assert!(result.extracted_text.is_empty());
            assert_eq!(result.error_message, RECOGNITION_FAILED);
        }
        assert_eq!(handler.stats().jobs_failed.get(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn half_close_counts_as_end_of_input() {
        let probe = Probe::default();
        let handler = handler(Setup::default(), &probe);
        let (client, session) = spawn_session(&handler);
        let (mut rd, mut wr) = tokio::io::split(client);

        let frame = ClientFrame::Submit(JobRequest::new("x", "x.png", b"eof".to_vec()));
        write_frame(&mut wr, &frame, LIMIT).await.unwrap();
        wr.shutdown().await.unwrap();

        let first = read_frame::<_, ServerFrame>(&mut rd, LIMIT).await.unwrap();
        assert!(matches!(first, Some(ServerFrame::Result(ref r)) if r.extracted_text == "EOF"));
        let last = read_frame::<_, ServerFrame>(&mut rd, LIMIT).await.unwrap();
        assert_eq!(last, Some(ServerFrame::Close(CloseStatus::Ok)));
        assert!(session.await.unwrap().is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn oversized_frame_drains_then_closes_with_error() {
        let probe = Probe::default();
        let handler = handler(Setup::default(), &probe);
        let (mut client, session) = spawn_session(&handler);

        submit(&mut client, "ok", b"fine").await;
        client
            .write_all(&((LIMIT as u32) + 1).to_le_bytes())
            .await
            .unwrap();

        let (results, status) = collect(&mut client).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].extracted_text, "FINE");
        assert!(matches!(status, CloseStatus::Error { ref message } if message.contains("protocol violation")));

        let summary = session.await.unwrap().unwrap();
        assert!(!summary.status.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn vanished_peer_tears_the_session_down() {
        let probe = Probe::default();
        let handler = handler(Setup::default(), &probe);
        let (mut client, session) = spawn_session(&handler);

        // Half a length prefix, then the connection disappears.
        client.write_all(&[7, 0]).await.unwrap();
        drop(client);

        let outcome = session.await.unwrap();
        assert!(matches!(outcome, Err(SessionError::Transport(_))));
        assert_eq!(handler.stats().sessions_closed.get(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn results_arrive_in_completion_order() {
        let probe = Probe::default();
        let handler = handler(Setup::default(), &probe);
        let (mut client, session) = spawn_session(&handler);

        let submitted = ["slowest", "slow", "fast"];
        for (id, payload) in submitted.iter().zip(["wait-300", "wait-150", "wait-5"]) {
            submit(&mut client, id, payload.as_bytes()).await;
        }
        write_frame(&mut client, &ClientFrame::Finish, LIMIT).await.unwrap();

        let (results, status) = collect(&mut client).await;
        assert!(status.is_ok());
        let completed: Vec<&str> = results.iter().map(|r| r.image_id.as_str()).collect();
        assert_ne!(completed, submitted);
        assert_eq!(completed[0], "fast");

        let seen: HashSet<&str> = completed.iter().copied().collect();
        let expected: HashSet<&str> = submitted.iter().copied().collect();
        assert_eq!(seen, expected);
        session.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn running_jobs_finish_after_teardown_and_their_results_are_discarded() {
        let probe = Probe::default();
        let handler = handler(
            Setup {
                threads: 2,
                ceiling: 2,
                ..Setup::default()
            },
            &probe,
        );
        let (mut client, session) = spawn_session(&handler);

        submit(&mut client, "one", b"wait-200").await;
        submit(&mut client, "two", b"wait-200").await;
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while probe.live.load(Ordering::SeqCst) < 2 && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(probe.live.load(Ordering::SeqCst), 2);

        client.write_all(&[9, 0]).await.unwrap();
        drop(client);
        let outcome = session.await.unwrap();
        assert!(matches!(outcome, Err(SessionError::Transport(_))));

        let stats = handler.stats();
        while stats.results_discarded.get() < 2 && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(stats.results_discarded.get(), 2);
        assert_eq!(stats.jobs_succeeded.get(), 2);
        assert_eq!(handler.governor.in_flight_bytes(), 0);
        assert_eq!(handler.governor.in_flight_jobs(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn peer_that_never_reads_stalls_its_own_writes() {
        const REQUESTS: usize = 5_000;

        let probe = Probe::default();
        let handler = handler(
            Setup {
                ceiling: 2,
                ..Setup::default()
            },
            &probe,
        );
        let (client, server) = tokio::io::duplex(4 * 1024);
        let session = {
            let handler = Arc::clone(&handler);
            tokio::spawn(async move { handler.handle(server, "mute".into()).await })
        };

        // Empty images are rejected without running, so only the outbound
        // path can hold this client back.
        let sent = Arc::new(AtomicUsize::new(0));
        let flood = {
            let sent = Arc::clone(&sent);
            tokio::spawn(async move {
                let mut client = client;
                let padding = "x".repeat(500);
                for i in 0..REQUESTS {
                    let request = JobRequest::new(format!("{i:05}-{padding}"), "e.png", Vec::new());
                    if write_frame(&mut client, &ClientFrame::Submit(request), LIMIT)
                        .await
                        .is_err()
                    {
                        break;
                    }
                    sent.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        tokio::time::sleep(Duration::from_millis(300)).await;
        let stalled_at = sent.load(Ordering::SeqCst);
        assert!(stalled_at < REQUESTS, "all {REQUESTS} writes went through");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sent.load(Ordering::SeqCst), stalled_at);

        let rejected = handler.stats().jobs_rejected.get();
        assert!(rejected < 32, "{rejected} rejections buffered for a silent peer");
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);

        flood.abort();
        let outcome = tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .expect("session should end once the peer is gone")
            .unwrap();
        assert!(outcome.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn overlong_image_id_is_rejected_with_a_clipped_id() {
        let probe = Probe::default();
        let handler = handler(Setup::default(), &probe);
        let (mut client, session) = spawn_session(&handler);

        let long_id = "y".repeat(MAX_IMAGE_ID_LEN + 100);
        submit(&mut client, &long_id, b"text").await;
        write_frame(&mut client, &ClientFrame::Finish, LIMIT).await.unwrap();

        let (results, status) = collect(&mut client).await;
        assert!(status.is_ok());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].image_id, &long_id[..MAX_IMAGE_ID_LEN]);
        assert_eq!(results[0].error_message, IMAGE_ID_TOO_LONG);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
        assert_eq!(session.await.unwrap().unwrap().rejected, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn oversized_result_becomes_a_failure_and_the_session_survives() {
        let probe = Probe::default();
        let handler = handler(
            Setup {
                limit: 256,
                ..Setup::default()
            },
            &probe,
        );
        let (mut client, session) = spawn_session(&handler);

        submit(&mut client, "wordy", b"verbose").await;
        submit(&mut client, "short", b"ok").await;
        write_frame(&mut client, &ClientFrame::Finish, LIMIT).await.unwrap();

        let (mut results, status) = collect(&mut client).await;
        results.sort_by(|x, y| x.image_id.cmp(&y.image_id));
        assert_eq!(status, CloseStatus::Ok);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].extracted_text, "OK");
        assert_eq!(results[1].image_id, "wordy");
        assert!(!results[1].success);
        assert_eq!(results[1].error_message, RESULT_TOO_LARGE);
        session.await.unwrap().unwrap();
    }
}
