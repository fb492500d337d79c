// SPDX-License-Identifier: MPL-2.0

//! Detects other applications playing sound by polling `pactl`.

use std::{process::Command, time::Duration};

use super::{AudioSignal, Poller};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Application names treated as our own playback.
const OWN_APPLICATIONS: &[&str] = &["universal-wallpaper", "wallpaper", "mpv"];

/// One entry of `pactl list sink-inputs`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SinkInput {
    pub corked: bool,
    pub application: Option<String>,
}

/// Parse the human-readable `pactl list sink-inputs` output.
pub fn parse_sink_inputs(text: &str) -> Vec<SinkInput> {
    let mut inputs = Vec::new();
    let mut current: Option<SinkInput> = None;

    for line in text.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with("Sink Input #") {
            inputs.extend(current.take());
            current = Some(SinkInput::default());
            continue;
        }

        let Some(input) = current.as_mut() else {
            continue;
        };

        if let Some(value) = trimmed.strip_prefix("Corked:") {
            input.corked = value.trim().eq_ignore_ascii_case("yes");
        } else if let Some(value) = trimmed.strip_prefix("application.name = ") {
            input.application = Some(value.trim().trim_matches('"').to_owned());
        }
    }

    inputs.extend(current);
    inputs
}

/// Whether any uncorked input belongs to someone else. Inputs without an
/// application name count as someone else.
pub fn other_audio_active(inputs: &[SinkInput]) -> bool {
    inputs.iter().filter(|input| !input.corked).any(|input| {
        input.application.as_deref().is_none_or(|name| {
            let name = name.to_ascii_lowercase();
            !OWN_APPLICATIONS.iter().any(|own| name.contains(own))
        })
    })
}

fn probe(missing_logged: &mut bool) -> bool {
    let output = match Command::new("pactl").args(["list", "sink-inputs"]).output() {
        Ok(output) => output,
        Err(why) => {
            if !*missing_logged {
                tracing::warn!(%why, "pactl unavailable, audio detection disabled");
                *missing_logged = true;
            }
            return false;
        }
    };

    if !output.status.success() {
        tracing::debug!(status = %output.status, "pactl list sink-inputs failed");
        return false;
    }

    let inputs = parse_sink_inputs(&String::from_utf8_lossy(&output.stdout));
    other_audio_active(&inputs)
}

/// Reports whether another application is producing sound.
pub struct AudioMonitor {
    poller: Option<Poller>,
}

impl AudioMonitor {
    pub fn start(enabled: bool) -> Self {
        if !enabled {
            tracing::debug!("Audio monitor disabled");
            return Self { poller: None };
        }

        let mut missing_logged = false;
        let poller = Poller::spawn("audio-monitor", POLL_INTERVAL, move || {
            probe(&mut missing_logged)
        });

        match poller {
            Ok(poller) => {
                tracing::info!("Audio monitor started");
                Self {
                    poller: Some(poller),
                }
            }
            Err(why) => {
                tracing::error!(%why, "Failed to start audio monitor");
                Self { poller: None }
            }
        }
    }
}

impl AudioSignal for AudioMonitor {
    fn is_enabled(&self) -> bool {
        self.poller.is_some()
    }

    fn is_other_audio_active(&self) -> bool {
        self.poller.as_ref().is_some_and(Poller::is_active)
    }
}
