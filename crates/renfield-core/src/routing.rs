//! Audio-output device selection (§4.6).
//!
//! Pure over `Device` snapshots so the Gateway's device registry and the
//! Turn Engine's voice-origin delivery step can share one implementation
//! without either owning the other's state.

use crate::types::{Device, DeviceCapabilities, DeviceKind};

/// Narrow the capabilities a device declares at `register` time by server
/// policy (§4.6: "echoes back capabilities (possibly narrowed by server
/// policy — e.g., disabling wake-word on under-resourced devices)").
///
/// Wake-word detection is a continuously-running local model; mobile and
/// browser clients are not expected to keep it running in the background,
/// so the server never grants it regardless of what the device declares.
pub fn narrow_capabilities(kind: DeviceKind, declared: DeviceCapabilities) -> DeviceCapabilities {
    let has_wakeword = declared.has_wakeword && matches!(kind, DeviceKind::Satellite | DeviceKind::StationaryPanel | DeviceKind::Kiosk);
    DeviceCapabilities { has_wakeword, ..declared }
}

/// Select the device that should receive synthesized audio for a
/// voice-origin turn that began at `origin`, given the other devices
/// currently online in the same room (`origin` itself excluded).
///
/// Implements the 4-tier policy exactly:
/// 1. `origin` has a speaker and is stationary → `origin`.
/// 2. Else, among `room_siblings` with a speaker, prefer the one with a
///    display, breaking ties by most recent heartbeat.
/// 3. Else, `origin` if it has a speaker.
/// 4. Else `None` — TTS is skipped, `done.tts_handled=false`.
pub fn select_audio_output_device<'a>(
    origin: &'a Device,
    room_siblings: &'a [Device],
) -> Option<&'a Device> {
    if origin.capabilities.has_speaker && origin.is_stationary {
        return Some(origin);
    }

    let mut candidates: Vec<&Device> = room_siblings
        .iter()
        .filter(|d| d.online && d.capabilities.has_speaker && d.device_id != origin.device_id)
        .collect();

    if !candidates.is_empty() {
        candidates.sort_by(|a, b| {
            b.capabilities
                .has_display
                .cmp(&a.capabilities.has_display)
                .then(b.last_heartbeat.cmp(&a.last_heartbeat))
        });
        return candidates.into_iter().next();
    }

    if origin.capabilities.has_speaker {
        return Some(origin);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DeviceCapabilities, DeviceKind};
    use chrono::{Duration, Utc};

    fn device(id: &str, has_speaker: bool, has_display: bool, stationary: bool, heartbeat_offset_secs: i64) -> Device {
        Device {
            device_id: id.to_string(),
            kind: DeviceKind::Satellite,
            capabilities: DeviceCapabilities {
                has_microphone: true,
                has_speaker,
                has_wakeword: false,
                has_display,
            },
            room_id: "kitchen".to_string(),
            room_admin_assigned: false,
            is_stationary: stationary,
            last_heartbeat: Utc::now() + Duration::seconds(heartbeat_offset_secs),
            online: true,
        }
    }

    #[test]
    fn stationary_origin_with_speaker_routes_to_itself() {
        let origin = device("sat-kitchen", true, false, true, 0);
        let siblings = vec![device("tablet-kitchen", true, true, false, 0)];
        let chosen = select_audio_output_device(&origin, &siblings).unwrap();
        assert_eq!(chosen.device_id, "sat-kitchen");
    }

    #[test]
    fn no_speaker_origin_routes_to_sibling_with_largest_display() {
        let origin = device("mic-only", false, false, false, 0);
        let tablet = device("tablet", true, true, false, -10);
        let speaker_only = device("speaker-only", true, false, false, 0);
        let siblings = vec![speaker_only, tablet.clone()];
        let chosen = select_audio_output_device(&origin, &siblings).unwrap();
        assert_eq!(chosen.device_id, "tablet");
    }

    #[test]
    fn ties_on_display_break_by_most_recent_heartbeat() {
        let origin = device("mic-only", false, false, false, 0);
        let stale = device("panel-a", true, true, false, -600);
        let fresh = device("panel-b", true, true, false, -1);
        let siblings = vec![stale, fresh];
        let chosen = select_audio_output_device(&origin, &siblings).unwrap();
        assert_eq!(chosen.device_id, "panel-b");
    }

    #[test]
    fn falls_back_to_origin_speaker_when_no_sibling_has_one() {
        let origin = device("mobile", true, false, false, 0);
        let siblings = vec![device("display-only", false, true, false, 0)];
        let chosen = select_audio_output_device(&origin, &siblings).unwrap();
        assert_eq!(chosen.device_id, "mobile");
    }

    #[test]
    fn no_speaker_anywhere_yields_none() {
        let origin = device("mic-only", false, false, false, 0);
        let siblings = vec![device("display-only", false, true, false, 0)];
        assert!(select_audio_output_device(&origin, &siblings).is_none());
    }

    #[test]
    fn offline_sibling_is_never_selected() {
        let origin = device("mic-only", false, false, false, 0);
        let mut offline = device("offline-speaker", true, true, false, 0);
        offline.online = false;
        let siblings = vec![offline];
        assert!(select_audio_output_device(&origin, &siblings).is_none());
    }
}

#[cfg(test)]
mod narrow_tests {
    use super::*;

    #[test]
    fn wakeword_is_stripped_on_mobile_and_browser() {
        let declared = DeviceCapabilities { has_microphone: true, has_speaker: false, has_wakeword: true, has_display: true };
        assert!(!narrow_capabilities(DeviceKind::MobileTablet, declared).has_wakeword);
        assert!(!narrow_capabilities(DeviceKind::Browser, declared).has_wakeword);
        assert!(narrow_capabilities(DeviceKind::Satellite, declared).has_wakeword);
    }
}
