//! The reasoning loop itself.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;

use ra_domain::config::ReActConfig;
use ra_domain::error::{Error, Result};
use ra_domain::{CancelToken, CompletionRequest, Message, ToolCallRequest};
use ra_providers::Dispatcher;
use ra_tools::ToolExecutor;

use crate::parser::{parse_response, ParsedStep};
use crate::prompt::{
    observation_message, render_system_prompt, self_correction_prompt, tool_error_body,
};
use crate::step::{ReActMetrics, ReActOutcome, ReActStep, TimelineEvent};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Drives the THOUGHT/ACTION/OBSERVATION/FINAL loop for one task.
///
/// The engine owns no conversation state; each [`ReActEngine::run`] builds
/// its message list from the rendered system prompt, the optional prior
/// history, and the task, then iterates until a FINAL step, the iteration
/// bound, the timeout, or cancellation.
pub struct ReActEngine {
    dispatcher: Arc<Dispatcher>,
    executor: Arc<ToolExecutor>,
    config: ReActConfig,
}

impl ReActEngine {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        executor: Arc<ToolExecutor>,
        config: ReActConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            dispatcher,
            executor,
            config,
        })
    }

    pub fn config(&self) -> &ReActConfig {
        &self.config
    }

    /// Run a task with no prior conversation.
    ///
    /// `base` carries the model id and sampling parameters; its message
    /// list is replaced by the engine.
    pub async fn run(
        &self,
        base: &CompletionRequest,
        task: &str,
        cancel: &CancelToken,
    ) -> ReActOutcome {
        self.run_with_history(base, task, &[], cancel).await
    }

    /// Run a task seeded with prior conversation history (inserted between
    /// the system prompt and the task message).
    pub async fn run_with_history(
        &self,
        base: &CompletionRequest,
        task: &str,
        history: &[Message],
        cancel: &CancelToken,
    ) -> ReActOutcome {
        let started = Instant::now();
        let deadline = started + Duration::from_millis(self.config.timeout_ms);

        let mut run = RunState::new(&self.config);

        let system = render_system_prompt(
            self.config.system_prompt_template.as_deref(),
            &self.executor.registry().definitions(),
            &self.config.examples,
        );
        let mut messages: Vec<Message> = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(system));
        messages.extend(history.iter().cloned());
        messages.push(Message::user(task));

        // One self-correction is outstanding at a time; a second
        // consecutive parse failure downgrades the raw text to a FINAL.
        let mut correction_pending = false;

        for iteration in 1..=self.config.max_iterations {
            run.iteration = iteration;

            if cancel.is_cancelled() {
                run.fail(Error::Cancelled("reasoning run cancelled".into()));
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                run.fail(Error::Timeout(format!(
                    "reasoning run exceeded {} ms",
                    self.config.timeout_ms
                )));
                break;
            }

            // Model call, bounded by whatever run budget remains.
            let mut req = base.clone();
            req.messages = messages.clone();
            req.system = None;
            let remaining = deadline - now;
            let response =
                match tokio::time::timeout(remaining, self.dispatcher.complete(&req, cancel, None))
                    .await
                {
                    Ok(Ok(response)) => response,
                    Ok(Err(e)) => {
                        run.fail(e);
                        break;
                    }
                    Err(_) => {
                        run.fail(Error::Timeout(format!(
                            "reasoning run exceeded {} ms",
                            self.config.timeout_ms
                        )));
                        break;
                    }
                };

            messages.push(Message::assistant(response.content.clone()));

            let steps = match parse_response(&response.content) {
                Ok(steps) => steps,
                Err(parse_err) => {
                    run.metrics.parse_errors += 1;
                    run.record_event("parse_error", &parse_err.to_string());

                    if self.config.strict {
                        run.fail(parse_err);
                        break;
                    }
                    if correction_pending {
                        // Second failure in a row: accept the raw text as
                        // the final answer rather than looping forever.
                        let answer = response.content.trim().to_owned();
                        run.record_step(ReActStep::Final {
                            content: answer.clone(),
                        });
                        run.finish(answer);
                        break;
                    }
                    correction_pending = true;
                    messages.push(Message::user(self_correction_prompt(
                        &response.content,
                        &parse_err.to_string(),
                    )));
                    continue;
                }
            };
            correction_pending = false;

            for step in &steps {
                if let ParsedStep::Thought(content) = step {
                    run.record_step(ReActStep::Thought {
                        content: content.clone(),
                    });
                }
            }

            // Classification priority: an ACTION wins over a FINAL in the
            // same response; the model was told one step at a time.
            let action = steps.iter().find_map(|s| match s {
                ParsedStep::Action { tool, args } => Some((tool.clone(), args.clone())),
                _ => None,
            });

            if let Some((tool, args)) = action {
                run.record_step(ReActStep::Action {
                    tool: tool.clone(),
                    args: args.clone(),
                });
                run.metrics.tool_calls += 1;

                let request = ToolCallRequest {
                    id: format!("react-{}", uuid::Uuid::new_v4()),
                    name: tool.clone(),
                    arguments: Value::Object(args).to_string(),
                };
                let mut results = self.executor.execute(&[request], cancel).await;
                let result = results.remove(0);

                if let Some(tool_err) = result.error {
                    if cancel.is_cancelled() {
                        run.fail(Error::Cancelled("reasoning run cancelled".into()));
                        break;
                    }
                    run.metrics.tool_errors += 1;
                    if self.config.strict {
                        run.record_step(ReActStep::Observation {
                            content: tool_err.clone(),
                            is_error: true,
                        });
                        run.fail(Error::ToolExecution {
                            tool,
                            message: tool_err,
                        });
                        break;
                    }
                    let body = tool_error_body(&tool_err);
                    run.record_step(ReActStep::Observation {
                        content: body.clone(),
                        is_error: true,
                    });
                    messages.push(Message::user(observation_message(&body)));
                } else {
                    run.record_step(ReActStep::Observation {
                        content: result.content.clone(),
                        is_error: false,
                    });
                    messages.push(Message::user(observation_message(&result.content)));
                }
                continue;
            }

            if let Some(final_text) = steps.iter().find_map(|s| match s {
                ParsedStep::Final(content) => Some(content.clone()),
                _ => None,
            }) {
                run.record_step(ReActStep::Final {
                    content: final_text.clone(),
                });
                run.finish(final_text);
                break;
            }

            // Thought-only response: loop for the ACTION or FINAL.
        }

        run.into_outcome(started, &self.config)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-run state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct RunState {
    steps: Vec<ReActStep>,
    metrics: ReActMetrics,
    timeline: Vec<TimelineEvent>,
    collect_timeline: bool,
    iteration: u32,
    answer: Option<String>,
    error: Option<Error>,
}

impl RunState {
    fn new(config: &ReActConfig) -> Self {
        Self {
            steps: Vec::new(),
            metrics: ReActMetrics::default(),
            timeline: Vec::new(),
            collect_timeline: config.collect_timeline,
            iteration: 0,
            answer: None,
            error: None,
        }
    }

    fn record_step(&mut self, step: ReActStep) {
        let (kind, content) = match &step {
            ReActStep::Thought { content } => ("thought", content.clone()),
            ReActStep::Action { tool, args } => {
                ("action", format!("{tool}({})", Value::Object(args.clone())))
            }
            ReActStep::Observation { content, .. } => ("observation", content.clone()),
            ReActStep::Final { content } => ("final", content.clone()),
        };
        self.record_event(kind, &content);
        self.steps.push(step);
    }

    fn record_event(&mut self, kind: &str, content: &str) {
        if self.collect_timeline {
            self.timeline.push(TimelineEvent {
                kind: kind.to_owned(),
                content: content.to_owned(),
                iteration: self.iteration,
                timestamp: Utc::now(),
            });
        }
    }

    fn finish(&mut self, answer: String) {
        self.answer = Some(answer);
    }

    fn fail(&mut self, error: Error) {
        tracing::debug!(iteration = self.iteration, error = %error, "reasoning run failed");
        self.error = Some(error);
    }

    fn into_outcome(mut self, started: Instant, config: &ReActConfig) -> ReActOutcome {
        let success = self.answer.is_some();
        if !success && self.error.is_none() {
            self.error = Some(Error::MaxIterations {
                iterations: config.max_iterations,
            });
        }
        self.metrics.iterations = self.iteration;
        self.metrics.duration_ms = started.elapsed().as_millis() as u64;

        ReActOutcome {
            answer: self.answer.unwrap_or_default(),
            success,
            steps: self.steps,
            iterations: self.iteration,
            metrics: config.collect_metrics.then_some(self.metrics),
            timeline: config.collect_timeline.then_some(self.timeline),
            error: self.error,
        }
    }
}
