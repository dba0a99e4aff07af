//! The client-side worker loop.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

use sn_types::{Candidate, Evaluator, Observation, SweepError, SweepResult, WireMessage};

/// Identity and connection settings for one worker process.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Host dispatch address to connect back to.
    pub connect: String,
    /// This worker's address as the host knows it.
    pub address: String,
    /// Machine category, echoed in the handshake.
    pub category: String,
}

/// Cooperative worker loop: one candidate in, exactly one evaluation,
/// one observation out, in the order received.
///
/// Recoverable evaluation errors become failure observations; a fatal one
/// exits the process so the host can detect the closed channel and mark
/// the worker unreachable.
pub struct ClientRunner<E: Evaluator> {
    config: ClientConfig,
    evaluator: E,
}

impl<E: Evaluator> ClientRunner<E> {
    pub fn new(config: ClientConfig, evaluator: E) -> Self {
        Self { config, evaluator }
    }

    /// Connect, handshake, and serve until the channel closes or the host
    /// sends a shutdown.
    pub async fn run(mut self) -> SweepResult<()> {
        let stream = TcpStream::connect(&self.config.connect).await?;
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        send_line(
            &mut write_half,
            &WireMessage::Hello {
                address: self.config.address.clone(),
                category: self.config.category.clone(),
            },
        )
        .await?;
        info!(host = %self.config.connect, worker = %self.config.address, "connected to host");

        loop {
            let Some(line) = lines.next_line().await? else {
                info!("host closed the channel, exiting");
                break;
            };

            match WireMessage::from_line(&line)? {
                WireMessage::Dispatch { candidate } => {
                    let observation = self.evaluate(candidate).await?;
                    send_line(&mut write_half, &WireMessage::Report { observation }).await?;
                }
                WireMessage::Shutdown => {
                    info!("shutdown requested by host");
                    break;
                }
                other => {
                    warn!(message = ?other, "unexpected message from host ignored");
                }
            }
        }
        Ok(())
    }

    async fn evaluate(&mut self, candidate: Candidate) -> SweepResult<Observation> {
        debug!(candidate = candidate.id, "evaluation started");
        match self.evaluator.evaluate(&candidate).await {
            Ok(values) => {
                debug!(candidate = candidate.id, "evaluation succeeded");
                Ok(Observation::score(candidate.id, values)
                    .with_worker(self.config.address.as_str()))
            }
            Err(e) if !e.fatal => {
                warn!(candidate = candidate.id, error = %e, "evaluation failed, reporting failure");
                Ok(Observation::failed(candidate.id, e.message)
                    .with_worker(self.config.address.as_str()))
            }
            Err(e) => {
                error!(candidate = candidate.id, error = %e, "non-recoverable evaluation fault");
                Err(SweepError::Eval(e))
            }
        }
    }
}

async fn send_line(writer: &mut OwnedWriteHalf, message: &WireMessage) -> SweepResult<()> {
    let line = message.to_line()?;
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluators::FnEvaluator;
    use sn_types::{EvalError, ParamSet, ParamValue};
    use tokio::net::TcpListener;

    async fn scripted_host() -> (String, TcpListener) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        (addr, listener)
    }

    fn config(connect: String) -> ClientConfig {
        ClientConfig {
            connect,
            address: "w1".into(),
            category: "test".into(),
        }
    }

    #[tokio::test]
    async fn serves_candidates_in_order_until_shutdown() {
        let (addr, listener) = scripted_host().await;

        let evaluator = FnEvaluator::new(|c: &Candidate| {
            let x = c.param("x").and_then(|v| v.as_f64()).unwrap_or(0.0);
            Ok(vec![x * 2.0])
        });
        let runner = ClientRunner::new(config(addr), evaluator);
        let client = tokio::spawn(runner.run());

        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        let hello = lines.next_line().await.unwrap().unwrap();
        match WireMessage::from_line(&hello).unwrap() {
            WireMessage::Hello { address, category } => {
                assert_eq!(address, "w1");
                assert_eq!(category, "test");
            }
            other => panic!("expected hello, got {other:?}"),
        }

        for (id, x) in [(1u64, 1.5), (2u64, 4.0)] {
            let mut params = ParamSet::new();
            params.insert("x".into(), ParamValue::Float(x));
            let msg = WireMessage::Dispatch {
                candidate: Candidate::new(id, params),
            };
            write_half
                .write_all(format!("{}\n", msg.to_line().unwrap()).as_bytes())
                .await
                .unwrap();

            let reply = lines.next_line().await.unwrap().unwrap();
            match WireMessage::from_line(&reply).unwrap() {
                WireMessage::Report { observation } => {
                    assert_eq!(observation.candidate_id, id);
                    assert_eq!(observation.primary_score(), Some(x * 2.0));
                    assert_eq!(observation.worker.as_deref(), Some("w1"));
                }
                other => panic!("expected report, got {other:?}"),
            }
        }

        write_half
            .write_all(format!("{}\n", WireMessage::Shutdown.to_line().unwrap()).as_bytes())
            .await
            .unwrap();
        client.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn recoverable_error_reported_as_failure_observation() {
        let (addr, listener) = scripted_host().await;

        let evaluator = FnEvaluator::new(|c: &Candidate| {
            Err(EvalError::recoverable(c.id, "dataset missing"))
        });
        let runner = ClientRunner::new(config(addr), evaluator);
        let client = tokio::spawn(runner.run());

        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        let _hello = lines.next_line().await.unwrap().unwrap();

        let msg = WireMessage::Dispatch {
            candidate: Candidate::new(5, ParamSet::new()),
        };
        write_half
            .write_all(format!("{}\n", msg.to_line().unwrap()).as_bytes())
            .await
            .unwrap();

        let reply = lines.next_line().await.unwrap().unwrap();
        match WireMessage::from_line(&reply).unwrap() {
            WireMessage::Report { observation } => {
                assert_eq!(observation.candidate_id, 5);
                assert!(!observation.is_success());
            }
            other => panic!("expected report, got {other:?}"),
        }

        drop(write_half);
        drop(lines);
        client.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn fatal_error_terminates_the_runner() {
        let (addr, listener) = scripted_host().await;

        let evaluator =
            FnEvaluator::new(|c: &Candidate| Err(EvalError::fatal(c.id, "gpu driver wedged")));
        let runner = ClientRunner::new(config(addr), evaluator);
        let client = tokio::spawn(runner.run());

        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        let _hello = lines.next_line().await.unwrap().unwrap();

        let msg = WireMessage::Dispatch {
            candidate: Candidate::new(9, ParamSet::new()),
        };
        write_half
            .write_all(format!("{}\n", msg.to_line().unwrap()).as_bytes())
            .await
            .unwrap();

        let result = client.await.unwrap();
        assert!(result.is_err(), "fatal evaluation fault must surface");
        // The host-facing symptom is a closed channel.
        assert_eq!(lines.next_line().await.unwrap(), None);
    }
}
