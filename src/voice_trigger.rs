//! Voice trigger / voice recognition state machine.
//!
//! Two kinds of hardware are supported. Trigger-only hardware has a low power
//! detector and no audio path of its own. Recognition hardware also exposes
//! the audio that fired the detector through a dedicated named stream, which
//! is held open until the input stream consuming that audio closes.

use crate::parms::{KEY_VOICE_TRIGGER, KEY_VOICE_TRIGGER_MIC, KvPairs};
use crate::route::{RouteConfig, RouteHandle};
use crate::types::{AUDIO_DEVICE_IN_BUILTIN_MIC, DeviceMask};

/// Named route of trigger-only hardware.
pub const VOICE_TRIGGER_STREAM: &str = "voice trigger";
/// Named route of trigger+audio hardware.
pub const VOICE_RECOGNITION_STREAM: &str = "voice recognition";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    /// No voice recognition hardware
    None,
    TriggerIdle,
    TriggerArmed,
    TriggerFired,
    RecogIdle,
    RecogArmed,
    RecogFired,
    /// Triggered audio is being captured
    RecogAudio,
    /// Re-arm requested while audio was still being captured
    RecogReArm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceEvent {
    Enable,
    Disable,
    /// External detector signal
    Triggered,
    AudioStarted,
    AudioEnded,
}

/// Side effect on the trigger route requested by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAction {
    None,
    /// Open (or re-apply the microphone on) the named route
    Open(&'static str),
    /// Disconnect and release the held route
    Close,
}

impl VoiceState {
    pub const ALL: [VoiceState; 9] = [
        VoiceState::None,
        VoiceState::TriggerIdle,
        VoiceState::TriggerArmed,
        VoiceState::TriggerFired,
        VoiceState::RecogIdle,
        VoiceState::RecogArmed,
        VoiceState::RecogFired,
        VoiceState::RecogAudio,
        VoiceState::RecogReArm,
    ];

    /// Initial state from the named routes the configuration declares.
    pub fn probe(routes: &dyn RouteConfig) -> Self {
        if routes.is_named_defined(VOICE_RECOGNITION_STREAM) {
            log::info!("Voice recognition mode");
            VoiceState::RecogIdle
        } else if routes.is_named_defined(VOICE_TRIGGER_STREAM) {
            log::info!("Voice trigger mode");
            VoiceState::TriggerIdle
        } else {
            log::info!("No voice recognition available");
            VoiceState::None
        }
    }

    /// Pure transition function.
    pub fn on_event(self, event: VoiceEvent) -> (VoiceState, RouteAction) {
        use RouteAction as A;
        use VoiceEvent as E;
        use VoiceState as S;

        match (self, event) {
            (S::TriggerIdle | S::TriggerFired, E::Enable) => {
                (S::TriggerArmed, A::Open(VOICE_TRIGGER_STREAM))
            }
            (S::RecogIdle, E::Enable) => (S::RecogArmed, A::Open(VOICE_RECOGNITION_STREAM)),
            (S::RecogAudio, E::Enable) => (S::RecogReArm, A::None),

            (S::TriggerArmed | S::TriggerFired, E::Disable) => (S::TriggerIdle, A::Close),
            (S::RecogArmed, E::Disable) => (S::RecogIdle, A::Close),
            // A fired recogniser keeps its route until the audio stage ends
            (S::RecogReArm, E::Disable) => (S::RecogAudio, A::None),

            (S::TriggerArmed, E::Triggered) => (S::TriggerFired, A::None),
            (S::RecogArmed, E::Triggered) => (S::RecogFired, A::None),

            (S::RecogFired, E::AudioStarted) => (S::RecogAudio, A::None),

            (S::RecogAudio, E::AudioEnded) => (S::RecogIdle, A::Close),
            (S::RecogReArm, E::AudioEnded) => (S::RecogArmed, A::None),

            (state, _) => (state, A::None),
        }
    }

    /// Named stream a voice-recognition input source should open, or `None`
    /// for the generic capture route.
    pub fn audio_stream_name(self) -> Option<&'static str> {
        match self {
            // Trigger-only hardware may still declare a recognition stream
            VoiceState::None
            | VoiceState::TriggerIdle
            | VoiceState::TriggerArmed
            | VoiceState::TriggerFired => Some(VOICE_RECOGNITION_STREAM),
            // No audio available from the recogniser until it fires
            VoiceState::RecogIdle | VoiceState::RecogArmed | VoiceState::RecogReArm => None,
            VoiceState::RecogFired => Some(VOICE_RECOGNITION_STREAM),
            // Audio stream already open
            VoiceState::RecogAudio => None,
        }
    }
}

/// Voice trigger state of the device plus the route it holds.
///
/// Lives under the device lock.
#[derive(Debug)]
pub(crate) struct VoiceTrigger {
    state: VoiceState,
    /// Microphone applied when arming; 0 selects the built-in mic
    mic: DeviceMask,
    stream: Option<RouteHandle>,
}

impl VoiceTrigger {
    pub(crate) fn new(state: VoiceState) -> Self {
        Self {
            state,
            mic: 0,
            stream: None,
        }
    }

    pub(crate) fn state(&self) -> VoiceState {
        self.state
    }

    /// Handle the `voice_trigger_mic` and `voice_trigger` device parameters.
    pub(crate) fn set_params(&mut self, kv: &KvPairs, routes: &dyn RouteConfig) {
        if let Some(mic) = kv.get_u32(KEY_VOICE_TRIGGER_MIC) {
            self.mic = mic;
        }

        let event = match kv.get(KEY_VOICE_TRIGGER) {
            Some("2") => VoiceEvent::Triggered,
            Some("1") => VoiceEvent::Enable,
            Some("0") => VoiceEvent::Disable,
            _ => return,
        };
        self.handle(event, routes);
    }

    pub(crate) fn handle(&mut self, event: VoiceEvent, routes: &dyn RouteConfig) {
        let (next, action) = self.state.on_event(event);

        match action {
            RouteAction::None => {}
            RouteAction::Open(name) => self.open_stream(name, routes),
            RouteAction::Close => self.close_stream(),
        }

        if next != self.state {
            log::info!("voice trigger {:?} --{:?}--> {:?}", self.state, event, next);
        } else {
            log::debug!("voice trigger {:?} ignores {:?}", self.state, event);
        }
        self.state = next;
    }

    fn open_stream(&mut self, name: &str, routes: &dyn RouteConfig) {
        if self.stream.is_none() {
            self.stream = routes.resolve_by_name(name).map(RouteHandle::new);
        }

        match &self.stream {
            Some(stream) => {
                let mic = if self.mic != 0 {
                    self.mic
                } else {
                    AUDIO_DEVICE_IN_BUILTIN_MIC
                };
                stream.apply_route(mic);
            }
            None => log::warn!("voice trigger stream '{}' could not be opened", name),
        }
    }

    fn close_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.apply_route(0);
        }
    }

    /// Drop the held route without changing state. Used when the device closes.
    pub(crate) fn release(&mut self) {
        self.close_stream();
    }
}
