//! Command-driven implementation of the interaction handlers

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tracing::info;

use super::command;
use super::text::{clean_response, recent_transcript, television_prompt};
use crate::config::InteractionConfig;
use crate::conversation::{ConversationLog, Role};
use crate::indicator::{Indicators, Pattern};
use crate::input::{CallbackId, InputMonitor};
use crate::state::InteractionHandlers;

const CAPTURE_POLL: Duration = Duration::from_millis(100);
const CAPTURE_GRACE: Duration = Duration::from_secs(10);

/// Handlers that shell out to the respond, speak, capture and boom tools
pub struct CommandInteractions {
    config: InteractionConfig,
    conversation: ConversationLog,
    indicators: Indicators,
    person: Arc<InputMonitor>,
    transcript: PathBuf,
    capture_file: PathBuf,
}

impl CommandInteractions {
    pub fn new(
        config: InteractionConfig,
        conversation: ConversationLog,
        indicators: Indicators,
        person: Arc<InputMonitor>,
        transcript: PathBuf,
        capture_file: PathBuf,
    ) -> Self {
        Self {
            config,
            conversation,
            indicators,
            person,
            transcript,
            capture_file,
        }
    }

    /// Ask for a reply to the conversation so far and speak it
    ///
    /// Erratic on the dynamite line while waiting, breathing on the
    /// intercom line while speaking. The first job is stopped before the
    /// second starts.
    fn respond_and_speak(&mut self) -> Result<()> {
        let conversation_path = self.conversation.path();

        let waiting = self.indicators.dynamite.try_start(Pattern::Erratic);
        let reply = command::output_of(
            &self.config.respond_program,
            &self.config.respond_args,
            &[conversation_path.as_os_str()],
        );
        if let Some(job) = waiting {
            job.stop();
        }

        let reply = clean_response(&reply.context("no reply")?);
        if reply.is_empty() {
            bail!("reply was empty after cleanup");
        }
        info!(chars = reply.len(), "speaking reply");

        let speaking = self.indicators.intercom.try_start(Pattern::Breathing);
        let spoken = command::feed(&self.config.speak_program, &self.config.speak_args, &reply);
        let recorded = self.conversation.append(Role::Assistant, &reply);
        if let Some(job) = speaking {
            job.stop();
        }

        spoken.context("failed to speak reply")?;
        recorded.context("failed to record reply")?;
        Ok(())
    }

    /// Record the person until they let go of the button
    ///
    /// Capture runs for the initial duration regardless; if the button is
    /// still held it continues until release, with each fresh press
    /// restarting the maximum-duration clock.
    fn capture_speech(&self) -> Result<String> {
        match fs::remove_file(&self.capture_file) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("failed to clear capture file {:?}", self.capture_file)
                })
            }
        }

        let pressed_at = Arc::new(Mutex::new(Instant::now()));
        let recording = Arc::new(AtomicBool::new(true));
        let press_id = CallbackId::next();
        let release_id = CallbackId::next();

        {
            let pressed_at = Arc::clone(&pressed_at);
            self.person.register_press(press_id, move || {
                *pressed_at.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
            });
        }
        {
            let recording = Arc::clone(&recording);
            self.person.register_release(release_id, move || {
                recording.store(false, Ordering::SeqCst);
            });
        }

        let captured = command::spawn(
            &self.config.capture_program,
            &self.config.capture_args,
            &[OsStr::new("-f"), self.capture_file.as_os_str()],
        )
        .map(|child| {
            thread::sleep(self.config.capture_initial());
            if self.person.sample() {
                while recording.load(Ordering::SeqCst)
                    && pressed_at
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .elapsed()
                        < self.config.capture_max()
                {
                    thread::sleep(CAPTURE_POLL);
                }
            }
            command::stop(child, CAPTURE_GRACE);
        });

        self.person.unregister_press(press_id);
        self.person.unregister_release(release_id);
        captured?;

        match fs::read_to_string(&self.capture_file) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e)
                .with_context(|| format!("failed to read capture file {:?}", self.capture_file)),
        }
    }
}

impl InteractionHandlers for CommandInteractions {
    fn comment_on_television(&mut self) -> Result<()> {
        let transcript = recent_transcript(&self.transcript, self.config.transcript_lines);
        let prompt = television_prompt(&transcript, &self.config);
        info!(heard = !transcript.is_empty(), "commenting on television");

        self.conversation
            .append(Role::User, &prompt)
            .context("failed to record prompt")?;
        self.respond_and_speak()
    }

    fn talk_with_person(&mut self) -> Result<()> {
        let listening = self.indicators.intercom.try_start(Pattern::Constant);
        let heard = self.capture_speech();
        if let Some(job) = listening {
            job.stop();
        }

        let heard = heard?;
        let heard = heard.trim();
        if heard.is_empty() {
            info!("nothing captured from person");
            return Ok(());
        }
        info!(chars = heard.len(), "captured person speech");

        self.conversation
            .append(Role::User, heard)
            .context("failed to record person speech")?;
        self.respond_and_speak()
    }

    fn archive_conversation(&mut self) -> Result<Option<PathBuf>> {
        Ok(self.conversation.archive()?)
    }

    fn boom(&mut self) -> Result<()> {
        let flashing = self.indicators.dynamite.try_start(Pattern::Flashing);
        let played = command::run(&self.config.boom_program, &self.config.boom_args);
        if let Some(job) = flashing {
            job.stop();
        }
        played
    }
}
