//! Console command parsing.

use broadcaster_ipc::{EngineCommand, PublishTarget};

pub const HELP: &str = "\
commands:
  start [<rtmp-url> <stream-key>]   go live (configured target if omitted)
  stop                              stop broadcasting
  mic on|off                        capture the microphone
  mic-device <id>|default           select the microphone device
  system-audio on|off               capture system audio
  app-audio exclude|include         leave this app's audio out of the stream
  exclude-app on|off                hide this app's windows from the stream
  state                             print the broadcast state
  quit                              shut down";

/// Parse one console line. Blank lines parse to `None`.
pub fn parse_command(line: &str) -> Result<Option<EngineCommand>, String> {
    let words: Vec<&str> = line.split_whitespace().collect();

    let command = match words.as_slice() {
        [] => return Ok(None),
        ["start"] => EngineCommand::StartBroadcast { target: None },
        ["start", url, key] => EngineCommand::StartBroadcast {
            target: Some(PublishTarget::new(*url, *key)),
        },
        ["stop"] => EngineCommand::StopBroadcast,
        ["mic", toggle] => EngineCommand::SetMicrophoneEnabled(on_off(toggle)?),
        ["mic-device", "default"] => EngineCommand::SelectMicrophone(None),
        ["mic-device", device] => EngineCommand::SelectMicrophone(Some(device.to_string())),
        ["system-audio", toggle] => EngineCommand::SetSystemAudioEnabled(on_off(toggle)?),
        ["app-audio", "exclude"] => EngineCommand::SetAppAudioExcluded(true),
        ["app-audio", "include"] => EngineCommand::SetAppAudioExcluded(false),
        ["exclude-app", toggle] => EngineCommand::SetExcludeAppFromStream(on_off(toggle)?),
        ["state"] => EngineCommand::GetState,
        ["quit"] | ["exit"] => EngineCommand::Shutdown,
        _ => return Err(format!("Unknown command: {}", line.trim())),
    };

    Ok(Some(command))
}

fn on_off(word: &str) -> Result<bool, String> {
    match word {
        "on" => Ok(true),
        "off" => Ok(false),
        other => Err(format!("Expected on or off, got {}", other)),
    }
}
