//! Media playback collaborators
//!
//! Audio and video playback are delegated to external player processes: one
//! task per medium owns the player child, spawning it on `PLAY`, killing it
//! on `STOP` or when replaced, and writing control lines (`pause`,
//! `seek <secs>`) to its stdin. When a player exits on its own the track is
//! reported back to the engine, which is what `audioEnd`/`videoEnd`
//! transition triggers match on.
//!
//! The command grammar (`PLAY:<file>:<volume>`, `STOP`, `PAUSE`, `RESUME`,
//! `SEEK:<seconds>`) is owned here, at the collaborator boundary; the
//! dispatcher hands the raw message string through untouched.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use curator_config::MediaConfig;
use curator_engine::{CollaboratorError, EngineHandle, MediaPlayer};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Capacity of a player's command queue
const COMMAND_QUEUE_CAPACITY: usize = 16;

/// Which playback collaborator a player instance is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    fn label(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

/// A parsed player command
#[derive(Debug, Clone, PartialEq)]
enum PlayerCommand {
    Play { file: String, volume: Option<String> },
    Stop,
    Pause,
    Resume,
    Seek(f64),
}

/// Parse a raw command string per the collaborator grammar
fn parse_command(raw: &str) -> Result<PlayerCommand, String> {
    let mut parts = raw.splitn(3, ':');
    let verb = parts.next().unwrap_or("").trim();

    match verb {
        "PLAY" => {
            let file = parts.next().unwrap_or("").trim();
            if file.is_empty() {
                return Err("PLAY requires a file name".to_string());
            }
            if file.contains("..") || file.starts_with('/') {
                return Err(format!("refusing path-escaping file name '{file}'"));
            }
            let volume = parts
                .next()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(String::from);
            Ok(PlayerCommand::Play {
                file: file.to_string(),
                volume,
            })
        }
        "STOP" => Ok(PlayerCommand::Stop),
        "PAUSE" => Ok(PlayerCommand::Pause),
        "RESUME" => Ok(PlayerCommand::Resume),
        "SEEK" => {
            let secs: f64 = parts
                .next()
                .unwrap_or("")
                .trim()
                .parse()
                .map_err(|_| format!("SEEK requires seconds, got '{raw}'"))?;
            Ok(PlayerCommand::Seek(secs))
        }
        other => Err(format!("unknown media command '{other}'")),
    }
}

/// Expand the configured argv template for a file and volume
fn build_argv(template: &[String], file: &Path, volume: &str) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            arg.replace("{file}", &file.to_string_lossy())
                .replace("{volume}", volume)
        })
        .collect()
}

/// Handle given to the dispatcher; parses commands and forwards them to the
/// player task without blocking.
pub struct Player {
    kind: MediaKind,
    commands: mpsc::Sender<PlayerCommand>,
}

impl MediaPlayer for Player {
    fn handle_command(&self, command: &str) -> Result<(), CollaboratorError> {
        let parsed = parse_command(command)
            .map_err(|e| format!("{} player: {e}", self.kind.label()))?;
        self.commands
            .try_send(parsed)
            .map_err(|e| format!("{} player queue: {e}", self.kind.label()))?;
        Ok(())
    }
}

/// Spawn a player task for one medium and return its dispatcher handle
pub fn spawn_player(kind: MediaKind, config: &MediaConfig, engine: EngineHandle) -> Player {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    let (dir, template) = match kind {
        MediaKind::Audio => (config.audio_dir.clone(), config.audio_player.clone()),
        MediaKind::Video => (config.video_dir.clone(), config.video_player.clone()),
    };

    let task = PlayerTask {
        kind,
        dir,
        template,
        engine,
        playing: None,
    };
    tokio::spawn(task.run(rx));

    Player { kind, commands: tx }
}

struct CurrentTrack {
    file: String,
    child: Child,
    stdin: Option<ChildStdin>,
}

struct PlayerTask {
    kind: MediaKind,
    dir: PathBuf,
    template: Vec<String>,
    engine: EngineHandle,
    playing: Option<CurrentTrack>,
}

impl PlayerTask {
    async fn run(mut self, mut commands: mpsc::Receiver<PlayerCommand>) {
        enum Step {
            Command(Option<PlayerCommand>),
            Exited(std::io::Result<std::process::ExitStatus>),
        }

        loop {
            let step = match self.playing.as_mut() {
                Some(current) => {
                    tokio::select! {
                        command = commands.recv() => Step::Command(command),
                        status = current.child.wait() => Step::Exited(status),
                    }
                }
                None => Step::Command(commands.recv().await),
            };

            match step {
                Step::Command(Some(command)) => self.handle(command).await,
                Step::Command(None) => break,
                Step::Exited(status) => {
                    let track = self.playing.take().expect("a track was playing");
                    match status {
                        Ok(code) if code.success() => {
                            info!(kind = self.kind.label(), file = %track.file, "Playback finished");
                        }
                        Ok(code) => {
                            warn!(kind = self.kind.label(), file = %track.file, %code, "Player exited abnormally");
                        }
                        Err(e) => {
                            warn!(kind = self.kind.label(), file = %track.file, error = %e, "Player wait failed");
                        }
                    }
                    self.report_end(&track.file);
                }
            }
        }
        self.kill_current().await;
    }

    async fn handle(&mut self, command: PlayerCommand) {
        match command {
            PlayerCommand::Play { file, volume } => {
                // Replacing a track is not a natural end; no end report.
                self.kill_current().await;
                self.start(&file, volume.as_deref().unwrap_or("1.0"));
            }
            PlayerCommand::Stop => {
                if self.playing.is_some() {
                    info!(kind = self.kind.label(), "Playback stopped");
                    self.kill_current().await;
                } else {
                    debug!(kind = self.kind.label(), "STOP with nothing playing");
                }
            }
            PlayerCommand::Pause => self.control_line("pause").await,
            PlayerCommand::Resume => self.control_line("resume").await,
            PlayerCommand::Seek(secs) => self.control_line(&format!("seek {secs}")).await,
        }
    }

    fn start(&mut self, file: &str, volume: &str) {
        let path = self.dir.join(file);
        let argv = build_argv(&self.template, &path, volume);
        let Some((program, args)) = argv.split_first() else {
            error!(kind = self.kind.label(), "Player command template is empty");
            return;
        };

        match Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(mut child) => {
                info!(kind = self.kind.label(), file = %file, player = %program, "Playback started");
                let stdin = child.stdin.take();
                self.playing = Some(CurrentTrack {
                    file: file.to_string(),
                    child,
                    stdin,
                });
            }
            Err(e) => {
                error!(kind = self.kind.label(), file = %file, player = %program, error = %e, "Failed to start player");
            }
        }
    }

    /// Write one control line to the player's stdin (slave-mode protocol)
    async fn control_line(&mut self, line: &str) {
        let Some(current) = self.playing.as_mut() else {
            debug!(kind = self.kind.label(), line = %line, "Control with nothing playing");
            return;
        };
        let Some(stdin) = current.stdin.as_mut() else {
            warn!(kind = self.kind.label(), "Player has no stdin, control ignored");
            return;
        };
        if let Err(e) = stdin.write_all(format!("{line}\n").as_bytes()).await {
            warn!(kind = self.kind.label(), line = %line, error = %e, "Player control write failed");
        }
    }

    async fn kill_current(&mut self) {
        if let Some(mut track) = self.playing.take() {
            if let Err(e) = track.child.kill().await {
                warn!(kind = self.kind.label(), file = %track.file, error = %e, "Failed to kill player");
            }
        }
    }

    fn report_end(&self, file: &str) {
        match self.kind {
            MediaKind::Audio => self.engine.audio_finished(file),
            MediaKind::Video => self.engine.video_finished(file),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use curator_engine::{engine_channel, EngineEvent};
    use std::time::Duration;

    #[test]
    fn parses_the_command_grammar() {
        assert_eq!(
            parse_command("PLAY:intro.wav:0.8").unwrap(),
            PlayerCommand::Play {
                file: "intro.wav".to_string(),
                volume: Some("0.8".to_string()),
            }
        );
        assert_eq!(
            parse_command("PLAY:intro.wav").unwrap(),
            PlayerCommand::Play {
                file: "intro.wav".to_string(),
                volume: None,
            }
        );
        assert_eq!(parse_command("STOP").unwrap(), PlayerCommand::Stop);
        assert_eq!(parse_command("PAUSE").unwrap(), PlayerCommand::Pause);
        assert_eq!(parse_command("RESUME").unwrap(), PlayerCommand::Resume);
        assert_eq!(parse_command("SEEK:12.5").unwrap(), PlayerCommand::Seek(12.5));

        assert!(parse_command("PLAY:").is_err());
        assert!(parse_command("PLAY:../../etc/passwd").is_err());
        assert!(parse_command("SEEK:soon").is_err());
        assert!(parse_command("EXPLODE").is_err());
    }

    #[test]
    fn argv_template_substitution() {
        let template = vec![
            "mpg123".to_string(),
            "-f".to_string(),
            "{volume}".to_string(),
            "{file}".to_string(),
        ];
        let argv = build_argv(&template, Path::new("audio/intro.wav"), "0.8");
        assert_eq!(argv, vec!["mpg123", "-f", "0.8", "audio/intro.wav"]);
    }

    fn test_config(player: &[&str]) -> MediaConfig {
        MediaConfig {
            audio_dir: PathBuf::from("."),
            video_dir: PathBuf::from("."),
            audio_player: player.iter().map(|s| s.to_string()).collect(),
            video_player: player.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn natural_player_exit_reports_track_end() {
        let (handle, mut events) = engine_channel();
        // `true` exits immediately with success, standing in for a player
        // that reached the end of the track.
        let player = spawn_player(MediaKind::Audio, &test_config(&["true"]), handle);

        player.handle_command("PLAY:narration.wav:0.8").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("end report must arrive")
            .expect("channel open");
        assert!(matches!(event, EngineEvent::AudioFinished { file } if file == "narration.wav"));
    }

    #[tokio::test]
    async fn stop_kills_without_reporting_an_end() {
        let (handle, mut events) = engine_channel();
        let player = spawn_player(MediaKind::Video, &test_config(&["sleep", "60"]), handle);

        player.handle_command("PLAY:loop.mp4").unwrap();
        player.handle_command("STOP").unwrap();

        let outcome = tokio::time::timeout(Duration::from_millis(300), events.recv()).await;
        assert!(outcome.is_err(), "a killed player must not report track end");
    }

    #[tokio::test]
    async fn unknown_command_is_rejected_at_the_handle() {
        let (handle, _events) = engine_channel();
        let player = spawn_player(MediaKind::Audio, &test_config(&["true"]), handle);

        let err = player.handle_command("REWIND:2").unwrap_err();
        assert!(err.to_string().contains("unknown media command"));
    }
}
