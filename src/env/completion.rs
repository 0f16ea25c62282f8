//! The completion loop and the recursive evaluation patterns built on it.
//!
//! Generation is a loop of {read final logits → sample → append GENERATED
//! token → one-slot decode}, all mediated by the context's editor. The loop
//! blocks the caller; timeout is the only cancellation mechanism.

use std::sync::TryLockError;
use std::time::Instant;

use chrono::Utc;
use tracing::debug;

use crate::error::{EnvError, EnvResult};
use crate::types::CtxId;

use super::config::{CompletionParams, ShareMode};
use super::context::{Context, ContextState};
use super::Environment;

impl Environment {
    /// Run the completion loop on `id`. Rejects contexts that are already
    /// running (or otherwise occupied) with [`EnvError::ContextBusy`]; idle,
    /// complete and errored contexts may start a fresh run.
    pub fn complete(&self, id: CtxId, params: CompletionParams) -> EnvResult<()> {
        let ctx = self.require(id)?;
        let generated = self.run_loop(&ctx, &params)?;

        self.add_tokens_processed(generated as u64);
        let listeners = { ctx.lock().observers.clone() };
        for obs in &listeners {
            obs.on_complete(id, ContextState::Complete);
        }
        if self.trace_on() {
            debug!(ctx = id, generated, "completion finished");
        }
        Ok(())
    }

    /// Run the completion loop, then detokenize the newly generated suffix.
    pub fn complete_sync(&self, id: CtxId, params: CompletionParams) -> EnvResult<String> {
        let ctx = self.require(id)?;
        let before = { ctx.lock().editor.len() };

        self.complete(id, params)?;

        let body = ctx.lock();
        let all = body.editor.tokens();
        let suffix = &all[before.min(all.len())..];
        Ok(body.editor.detokenize(suffix)?)
    }

    /// Have a context evaluate its own buffer against `eval_prompt`.
    ///
    /// The buffer is snapshotted, replaced with a composite evaluation
    /// prompt, completed, and restored — on both the success and the failure
    /// path the context's surface state is unchanged.
    pub fn self_eval(
        &self,
        id: CtxId,
        eval_prompt: &str,
        params: CompletionParams,
    ) -> EnvResult<String> {
        let ctx = self.require(id)?;
        let (snapshot, composite) = {
            let body = ctx.lock();
            let text = body.editor.text()?;
            (
                body.editor.create_snapshot(),
                format!("[Context]\n{text}\n\n[Evaluation Prompt]\n{eval_prompt}\n\n[Evaluation]"),
            )
        };

        let run = ctx
            .set_prompt(&composite)
            .and_then(|()| self.complete_sync(id, params));

        let restored = {
            let mut body = ctx.lock();
            body.editor.restore_snapshot(&snapshot)
        };

        let result = run?;
        restored?;
        Ok(result)
    }

    /// Iteratively refine a context's output.
    ///
    /// Each round runs a completion and hands the full detokenized buffer to
    /// `should_continue`. The loop stops when the predicate declines or the
    /// last allowed iteration finishes; between rounds `refine_prompt` is
    /// appended to the buffer.
    pub fn refine(
        &self,
        id: CtxId,
        refine_prompt: &str,
        max_iterations: u32,
        mut should_continue: impl FnMut(&str) -> bool,
    ) -> EnvResult<String> {
        let ctx = self.require(id)?;
        let params = { ctx.lock().config.completion.clone() };

        for iteration in 0..max_iterations {
            self.complete(id, params.clone())?;
            let output = ctx.text()?;
            if !should_continue(&output) || iteration + 1 == max_iterations {
                return Ok(output);
            }
            ctx.append_prompt(&format!("\n\n{refine_prompt}\n"))?;
        }
        ctx.text()
    }

    /// Evaluate `prompt` in a throwaway child of `parent`: spawn an
    /// unshared child, run the completion there, destroy the child, return
    /// the generated text. The parent is untouched.
    pub fn eval_in_child(
        &self,
        parent: CtxId,
        prompt: &str,
        params: CompletionParams,
    ) -> EnvResult<String> {
        let mut config = self.require(parent)?.config();
        config.share_mode = ShareMode::None;

        let child = self.spawn_child(parent, config)?;
        let result = self.require(child).and_then(|ctx| {
            ctx.set_prompt(prompt)?;
            self.complete_sync(child, params)
        });
        let _ = self.destroy(child);
        result
    }

    fn run_loop(&self, ctx: &Context, params: &CompletionParams) -> EnvResult<u32> {
        let mut body = match ctx.body.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Err(EnvError::ContextBusy(ctx.id())),
            Err(TryLockError::Poisoned(poison)) => poison.into_inner(),
        };
        if matches!(
            body.state,
            ContextState::Running | ContextState::Waiting | ContextState::Suspended
        ) {
            return Err(EnvError::ContextBusy(ctx.id()));
        }

        body.state = ContextState::Running;
        body.started_at = Some(Utc::now());
        body.tokens_generated = 0;
        let started = Instant::now();

        if let Err(err) = body.editor.sync_kv_cache() {
            body.state = ContextState::Error;
            return Err(err.into());
        }

        let mut sampler = self.model().sampler(&params.sampling());
        let mut generated = 0u32;

        for _ in 0..params.n_predict {
            if params.timeout_ms > 0 && started.elapsed().as_millis() as u64 > params.timeout_ms {
                body.state = ContextState::Error;
                return Err(EnvError::Timeout(params.timeout_ms));
            }

            let token = match body.editor.final_logits() {
                Ok(logits) => sampler.sample(logits),
                Err(_) => {
                    body.state = ContextState::Error;
                    return Err(EnvError::Model);
                }
            };
            sampler.accept(token);

            if self.model().is_end_of_generation(token) {
                break;
            }

            if let Err(err) = body.editor.push_generated(token) {
                body.state = ContextState::Error;
                return Err(err.into());
            }
            generated += 1;
            body.tokens_generated = generated;

            for obs in &body.observers {
                obs.on_token(ctx.id(), token);
            }

            if body.editor.decode_appended().is_err() {
                body.state = ContextState::Error;
                return Err(EnvError::Model);
            }
        }

        body.state = ContextState::Complete;
        body.finished_at = Some(Utc::now());
        Ok(generated)
    }
}
