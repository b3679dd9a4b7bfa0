use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dauber_contracts::conversation::{ConversationEntry, ConversationLog};
use dauber_contracts::events::{EventPayload, EventWriter};
use dauber_contracts::frames::{Frame, FrameStore};
use dauber_contracts::prefs::Preferences;
use dauber_contracts::prompts::TouchLevel;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::anthropic::{
    is_valid_key_format, FeedbackError, FeedbackProvider, FeedbackRequest, KeyValidation,
    MAX_HISTORY_ENTRIES,
};
use crate::camera::{CameraError, CameraSession, CameraState, DeviceDescriptor};
use crate::capture::{capture_frame, CaptureError};

#[derive(Debug, Error)]
pub enum StudioError {
    #[error("Please enter your API key first")]
    MissingCredential,
    #[error("Please enter an API key")]
    EmptyCredential,
    #[error("Invalid key format. Should start with sk-ant-")]
    MalformedCredential,
    #[error("{0}")]
    CredentialRejected(String),
    #[error("A feedback request is already in progress")]
    RequestInFlight,
    #[error("Camera not ready")]
    CameraNotReady,
    #[error("Failed to capture frame: {0}")]
    CaptureFailed(String),
    #[error("No frames captured yet")]
    NoFrames,
    #[error("Follow-up text is empty")]
    EmptyFollowUp,
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Feedback(#[from] FeedbackError),
}

impl StudioError {
    pub fn kind(&self) -> &'static str {
        match self {
            StudioError::MissingCredential => "credential-missing",
            StudioError::EmptyCredential | StudioError::MalformedCredential => "credential-format",
            StudioError::CredentialRejected(_) => "credential-invalid",
            StudioError::RequestInFlight => "in-flight",
            StudioError::CameraNotReady => "camera-not-ready",
            StudioError::CaptureFailed(_) => "capture-failed",
            StudioError::NoFrames => "no-frames",
            StudioError::EmptyFollowUp => "empty-follow-up",
            StudioError::Camera(err) => err.kind(),
            StudioError::Feedback(err) => err.kind(),
        }
    }
}

impl From<CaptureError> for StudioError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::NotReady => StudioError::CameraNotReady,
            CaptureError::Failed(message) => StudioError::CaptureFailed(message),
        }
    }
}

/// Single-flight flag shared by everything that can start a feedback request.
#[derive(Debug, Clone, Default)]
pub struct RequestGate {
    busy: Arc<AtomicBool>,
}

impl RequestGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// `None` while another ticket is alive. Dropping the ticket reopens the
    /// gate.
    pub fn try_acquire(&self) -> Option<RequestTicket> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RequestTicket {
                busy: self.busy.clone(),
            })
    }
}

#[derive(Debug)]
pub struct RequestTicket {
    busy: Arc<AtomicBool>,
}

impl Drop for RequestTicket {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackTurn {
    pub frame_id: String,
    pub compare_frame_id: Option<String>,
    pub content: String,
    pub usage: Value,
}

/// One painting session: a live camera, the frames taken from it, the
/// conversation about them, and the preferences that shape each request.
pub struct Studio {
    camera: CameraSession,
    frames: FrameStore,
    prefs: Preferences,
    provider: Box<dyn FeedbackProvider>,
    conversation: ConversationLog,
    events: EventWriter,
    gate: RequestGate,
    fallback_credential: Option<String>,
    latest_frame_id: Option<String>,
    last_usage: Option<Value>,
}

impl Studio {
    pub fn new(
        camera: CameraSession,
        prefs: Preferences,
        provider: Box<dyn FeedbackProvider>,
        events: EventWriter,
    ) -> Self {
        events.emit_lossy(
            "session_started",
            map_object(json!({
                "touch_level": prefs.touch_level().id(),
                "has_credential": prefs.api_key().is_some(),
            })),
        );
        Self {
            camera,
            frames: FrameStore::new(),
            prefs,
            provider,
            conversation: ConversationLog::new(),
            events,
            gate: RequestGate::new(),
            fallback_credential: None,
            latest_frame_id: None,
            last_usage: None,
        }
    }

    /// Credential used when none is stored in preferences.
    pub fn with_fallback_credential(mut self, credential: Option<String>) -> Self {
        self.fallback_credential = credential
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        self
    }

    pub fn camera(&self) -> &CameraSession {
        &self.camera
    }

    pub fn frames(&self) -> &FrameStore {
        &self.frames
    }

    pub fn prefs(&self) -> &Preferences {
        &self.prefs
    }

    pub fn conversation(&self) -> &ConversationLog {
        &self.conversation
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    pub fn gate(&self) -> RequestGate {
        self.gate.clone()
    }

    pub fn latest_frame_id(&self) -> Option<&str> {
        self.latest_frame_id.as_deref()
    }

    pub fn last_usage(&self) -> Option<&Value> {
        self.last_usage.as_ref()
    }

    pub fn camera_ready(&self) -> bool {
        matches!(self.camera.state(), CameraState::Active)
    }

    pub fn credential(&self) -> Option<String> {
        self.prefs
            .api_key()
            .or_else(|| self.fallback_credential.clone())
    }

    /// Whether the capture shortcut should fire right now.
    pub fn can_trigger(&self) -> bool {
        self.credential().is_some() && !self.gate.is_busy()
    }

    pub fn start_camera(&mut self) -> Result<(), StudioError> {
        let result = self.camera.initialize();
        self.report_camera("camera_started", &result);
        result.map_err(StudioError::from)
    }

    pub fn switch_camera(&mut self, device_id: &str) -> Result<(), StudioError> {
        let result = self.camera.switch_device(device_id);
        self.report_camera("camera_switched", &result);
        result.map_err(StudioError::from)
    }

    pub fn list_devices(&mut self) -> Vec<DeviceDescriptor> {
        self.camera.refresh_devices().to_vec()
    }

    /// Toggles the comparison frame. Selecting the current one clears it.
    pub fn select_compare(&mut self, frame_id: &str) -> Option<&Frame> {
        self.frames.select_for_comparison(Some(frame_id));
        self.events.emit_lossy(
            "compare_selected",
            map_object(json!({ "frame_id": self.frames.compare_frame_id() })),
        );
        self.frames.resolve_comparison_frame()
    }

    pub fn clear_compare(&mut self) {
        self.frames.clear_comparison();
        self.events
            .emit_lossy("compare_selected", map_object(json!({ "frame_id": null })));
    }

    pub fn clear_frames(&mut self) {
        let dropped = self.frames.len();
        self.frames.clear_all();
        self.events
            .emit_lossy("frames_cleared", map_object(json!({ "dropped": dropped })));
    }

    pub fn set_touch_level(&mut self, level: TouchLevel) {
        self.prefs.set_touch_level(level);
        self.events.emit_lossy(
            "preferences_changed",
            map_object(json!({ "touch_level": level.id() })),
        );
    }

    pub fn set_session_context(&mut self, context: &str) {
        self.prefs.set_session_context(context);
        self.events.emit_lossy(
            "preferences_changed",
            map_object(json!({ "session_context_chars": context.trim().chars().count() })),
        );
    }

    /// Format-checks, validates, and stores a credential. Nothing is stored
    /// unless validation accepts it.
    pub fn submit_api_key(&mut self, key: &str) -> Result<KeyValidation, StudioError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(StudioError::EmptyCredential);
        }
        if !is_valid_key_format(key) {
            return Err(StudioError::MalformedCredential);
        }
        let validation = self.provider.validate_key(key);
        self.events.emit_lossy(
            "credential_checked",
            map_object(json!({ "valid": validation.is_valid() })),
        );
        match validation {
            KeyValidation::Invalid(message) => Err(StudioError::CredentialRejected(message)),
            accepted => {
                self.prefs.set_api_key(Some(key));
                Ok(accepted)
            }
        }
    }

    pub fn clear_api_key(&mut self) {
        self.prefs.set_api_key(None);
        self.events.emit_lossy("credential_cleared", EventPayload::new());
    }

    /// Captures a fresh frame and asks for feedback on it, against the
    /// selected comparison frame when there is one.
    pub fn get_feedback(&mut self) -> Result<FeedbackTurn, StudioError> {
        let result = self.capture_and_request();
        self.report_turn(false, &result);
        result
    }

    /// Asks about the most recently captured frame without taking a new one.
    pub fn follow_up(&mut self, text: &str) -> Result<FeedbackTurn, StudioError> {
        let result = self.request_follow_up(text.trim());
        self.report_turn(true, &result);
        result
    }

    fn capture_and_request(&mut self) -> Result<FeedbackTurn, StudioError> {
        let credential = self.credential().ok_or(StudioError::MissingCredential)?;
        let _ticket = self.gate.try_acquire().ok_or(StudioError::RequestInFlight)?;

        let source = self.camera.source().ok_or(StudioError::CameraNotReady)?;
        // Taken before the capture, which may evict the selected frame.
        let compare = self.frames.resolve_comparison_frame().cloned();
        let frame = capture_frame(&mut self.frames, source)?;
        self.latest_frame_id = Some(frame.id.clone());
        self.events.emit_lossy(
            "frame_captured",
            map_object(json!({
                "frame_id": frame.id,
                "width": frame.width,
                "height": frame.height,
                "frames": self.frames.len(),
            })),
        );

        let context = self.prefs.session_context();
        let request = FeedbackRequest {
            credential: &credential,
            current_frame: &frame,
            compare_frame: compare.as_ref(),
            touch_level: self.prefs.touch_level(),
            session_context: &context,
            history: self.conversation.recent(MAX_HISTORY_ENTRIES),
            follow_up: None,
        };
        let response = self.provider.request_feedback(&request)?;

        self.conversation.push(ConversationEntry::capture_request());
        self.conversation.push(ConversationEntry::assistant(
            response.content.clone(),
            Some(frame.encoded_image.clone()),
        ));
        self.last_usage = Some(response.usage.clone());
        Ok(FeedbackTurn {
            frame_id: frame.id,
            compare_frame_id: compare.map(|frame| frame.id),
            content: response.content,
            usage: response.usage,
        })
    }

    fn request_follow_up(&mut self, text: &str) -> Result<FeedbackTurn, StudioError> {
        if text.is_empty() {
            return Err(StudioError::EmptyFollowUp);
        }
        let credential = self.credential().ok_or(StudioError::MissingCredential)?;
        let _ticket = self.gate.try_acquire().ok_or(StudioError::RequestInFlight)?;
        let frame = self.frames.latest().cloned().ok_or(StudioError::NoFrames)?;

        let context = self.prefs.session_context();
        let request = FeedbackRequest {
            credential: &credential,
            current_frame: &frame,
            compare_frame: None,
            touch_level: self.prefs.touch_level(),
            session_context: &context,
            history: self.conversation.recent(MAX_HISTORY_ENTRIES),
            follow_up: Some(text),
        };
        let response = self.provider.request_feedback(&request)?;

        self.conversation.push(ConversationEntry::follow_up(text));
        self.conversation.push(ConversationEntry::assistant(
            response.content.clone(),
            Some(frame.encoded_image.clone()),
        ));
        self.last_usage = Some(response.usage.clone());
        Ok(FeedbackTurn {
            frame_id: frame.id,
            compare_frame_id: None,
            content: response.content,
            usage: response.usage,
        })
    }

    fn report_turn(&self, follow_up: bool, result: &Result<FeedbackTurn, StudioError>) {
        match result {
            Ok(turn) => self.events.emit_lossy(
                "feedback_received",
                map_object(json!({
                    "follow_up": follow_up,
                    "frame_id": turn.frame_id,
                    "compare_frame_id": turn.compare_frame_id,
                    "chars": turn.content.chars().count(),
                    "usage": turn.usage,
                })),
            ),
            Err(err) => {
                tracing::warn!(kind = err.kind(), follow_up, "feedback turn failed: {err}");
                self.events.emit_lossy(
                    "feedback_failed",
                    map_object(json!({
                        "follow_up": follow_up,
                        "kind": err.kind(),
                        "error": err.to_string(),
                    })),
                );
            }
        }
    }

    fn report_camera(&self, event_type: &str, result: &Result<(), CameraError>) {
        match result {
            Ok(()) => self.events.emit_lossy(
                event_type,
                map_object(json!({ "device_id": self.camera.active_device_id() })),
            ),
            Err(err) => self.events.emit_lossy(
                "camera_failed",
                map_object(json!({ "kind": err.kind(), "error": err.to_string() })),
            ),
        }
    }

}

fn map_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    use chrono::Utc;
    use dauber_contracts::conversation::ConversationEntry;
    use dauber_contracts::events::EventWriter;
    use dauber_contracts::frames::MAX_FRAMES;
    use dauber_contracts::prefs::Preferences;
    use serde_json::{json, Value};

    use super::{RequestGate, Studio, StudioError};
    use crate::anthropic::{
        build_messages, FeedbackError, FeedbackProvider, FeedbackRequest, FeedbackResponse,
        KeyValidation, MAX_HISTORY_ENTRIES,
    };
    use crate::camera::tests::FakeBackend;
    use crate::camera::CameraSession;

    const KEY: &str = "sk-ant-REDACTED";

    #[derive(Default)]
    struct Calls {
        messages: Vec<Vec<Value>>,
        compare_ids: Vec<Option<String>>,
        gate_busy: Vec<bool>,
    }

    struct ScriptedProvider {
        replies: RefCell<VecDeque<Result<FeedbackResponse, FeedbackError>>>,
        validation: KeyValidation,
        calls: Rc<RefCell<Calls>>,
        gate: Rc<RefCell<Option<RequestGate>>>,
    }

    impl FeedbackProvider for ScriptedProvider {
        fn request_feedback(
            &self,
            request: &FeedbackRequest<'_>,
        ) -> Result<FeedbackResponse, FeedbackError> {
            let mut calls = self.calls.borrow_mut();
            calls.messages.push(build_messages(request, Utc::now()));
            calls
                .compare_ids
                .push(request.compare_frame.map(|frame| frame.id.clone()));
            if let Some(gate) = self.gate.borrow().as_ref() {
                calls.gate_busy.push(gate.try_acquire().is_none());
            }
            self.replies
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Ok(reply("Looking good.")))
        }

        fn validate_key(&self, _key: &str) -> KeyValidation {
            self.validation.clone()
        }
    }

    fn reply(text: &str) -> FeedbackResponse {
        FeedbackResponse {
            content: text.to_string(),
            usage: json!({"input_tokens": 10, "output_tokens": 5}),
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        studio: Studio,
        calls: Rc<RefCell<Calls>>,
    }

    fn harness(
        key: Option<&str>,
        replies: Vec<Result<FeedbackResponse, FeedbackError>>,
        validation: KeyValidation,
    ) -> anyhow::Result<Harness> {
        let dir = tempfile::tempdir()?;
        let prefs = Preferences::open(dir.path().join("prefs.json"));
        prefs.set_api_key(key);
        let (backend, _ledger) = FakeBackend::new(&["easel-cam"]);
        let camera = CameraSession::new(Box::new(backend), prefs.clone());
        let calls = Rc::new(RefCell::new(Calls::default()));
        let gate_slot = Rc::new(RefCell::new(None));
        let provider = ScriptedProvider {
            replies: RefCell::new(replies.into()),
            validation,
            calls: calls.clone(),
            gate: gate_slot.clone(),
        };
        let events = EventWriter::new(dir.path().join("events.jsonl"), "session-test");
        let studio = Studio::new(camera, prefs, Box::new(provider), events);
        *gate_slot.borrow_mut() = Some(studio.gate());
        Ok(Harness {
            _dir: dir,
            studio,
            calls,
        })
    }

    fn event_types(studio: &Studio) -> anyhow::Result<Vec<String>> {
        let text = std::fs::read_to_string(studio.events().path())?;
        let mut types = Vec::new();
        for line in text.lines() {
            let event: Value = serde_json::from_str(line)?;
            types.push(event["type"].as_str().unwrap_or_default().to_string());
        }
        Ok(types)
    }

    #[test]
    fn missing_credential_is_rejected_before_capture() -> anyhow::Result<()> {
        let mut h = harness(None, Vec::new(), KeyValidation::Valid)?;
        h.studio.start_camera()?;
        assert!(!h.studio.can_trigger());

        let err = h.studio.get_feedback().err();
        assert!(matches!(err, Some(StudioError::MissingCredential)));
        assert!(h.studio.frames().is_empty());
        assert!(h.calls.borrow().messages.is_empty());
        assert!(event_types(&h.studio)?.contains(&"feedback_failed".to_string()));
        Ok(())
    }

    #[test]
    fn inactive_camera_is_not_ready() -> anyhow::Result<()> {
        let mut h = harness(Some(KEY), Vec::new(), KeyValidation::Valid)?;
        let err = h.studio.get_feedback().err();
        assert!(matches!(err, Some(StudioError::CameraNotReady)));
        assert!(h.studio.frames().is_empty());
        assert!(h.studio.can_trigger());
        Ok(())
    }

    #[test]
    fn feedback_turn_captures_and_records_both_entries() -> anyhow::Result<()> {
        let mut h = harness(Some(KEY), vec![Ok(reply("Strong diagonal."))], KeyValidation::Valid)?;
        h.studio.start_camera()?;
        let turn = h.studio.get_feedback()?;

        assert_eq!(turn.content, "Strong diagonal.");
        assert_eq!(h.studio.frames().len(), 1);
        assert_eq!(h.studio.latest_frame_id(), Some(turn.frame_id.as_str()));
        let frame = h.studio.frames().latest().cloned();
        assert_eq!(frame.as_ref().map(|frame| (frame.width, frame.height)), Some((1280, 720)));

        let entries = h.studio.conversation().entries();
        assert_eq!(entries.len(), 2);
        assert!(matches!(
            &entries[0],
            ConversationEntry::User { display_text: Some(text), is_follow_up: false, .. }
                if text == "Get feedback"
        ));
        assert!(matches!(
            &entries[1],
            ConversationEntry::Assistant { content, frame_thumbnail: Some(thumb), .. }
                if content == "Strong diagonal." && thumb.starts_with("data:image/jpeg;base64,")
        ));
        assert_eq!(
            h.studio.last_usage(),
            Some(&json!({"input_tokens": 10, "output_tokens": 5}))
        );

        let types = event_types(&h.studio)?;
        assert!(types.contains(&"frame_captured".to_string()));
        assert!(types.contains(&"feedback_received".to_string()));
        Ok(())
    }

    #[test]
    fn gate_is_held_during_request_and_released_after_failure() -> anyhow::Result<()> {
        let mut h = harness(
            Some(KEY),
            vec![Err(FeedbackError::InvalidCredential)],
            KeyValidation::Valid,
        )?;
        h.studio.start_camera()?;

        let err = h.studio.get_feedback().err();
        assert_eq!(err.map(|err| err.to_string()).as_deref(), Some("Invalid API key"));
        assert_eq!(h.calls.borrow().gate_busy, vec![true]);
        assert!(h.studio.can_trigger());
        assert!(h.studio.conversation().is_empty());
        assert_eq!(h.studio.frames().len(), 1);
        Ok(())
    }

    #[test]
    fn second_request_while_in_flight_is_rejected() -> anyhow::Result<()> {
        let mut h = harness(Some(KEY), Vec::new(), KeyValidation::Valid)?;
        h.studio.start_camera()?;

        let gate = h.studio.gate();
        let ticket = gate.try_acquire();
        assert!(ticket.is_some());
        assert!(!h.studio.can_trigger());
        assert!(matches!(
            h.studio.get_feedback().err(),
            Some(StudioError::RequestInFlight)
        ));
        assert!(h.studio.frames().is_empty());

        drop(ticket);
        assert!(h.studio.get_feedback().is_ok());
        Ok(())
    }

    #[test]
    fn comparison_frame_is_forwarded_and_follow_up_uses_latest_frame() -> anyhow::Result<()> {
        let mut h = harness(Some(KEY), Vec::new(), KeyValidation::Valid)?;
        h.studio.start_camera()?;

        let first = h.studio.get_feedback()?;
        assert!(h.studio.select_compare(&first.frame_id).is_some());
        let second = h.studio.get_feedback()?;
        assert_eq!(second.compare_frame_id.as_deref(), Some(first.frame_id.as_str()));

        let turn = h.studio.follow_up("  is the horizon level?  ")?;
        assert_eq!(turn.frame_id, second.frame_id);
        assert_eq!(turn.compare_frame_id, None);

        let calls = h.calls.borrow();
        assert_eq!(
            calls.compare_ids,
            vec![None, Some(first.frame_id.clone()), None]
        );
        let last = calls.messages.last().cloned().unwrap_or_default();
        assert_eq!(last.len(), 5);
        assert_eq!(last[4]["content"][1]["text"], json!("is the horizon level?"));
        drop(calls);

        let entries = h.studio.conversation().entries();
        assert!(matches!(
            &entries[4],
            ConversationEntry::User { display_text: Some(text), is_follow_up: true, .. }
                if text == "is the horizon level?"
        ));
        Ok(())
    }

    #[test]
    fn oldest_frame_selected_for_comparison_is_sent_before_eviction() -> anyhow::Result<()> {
        let mut h = harness(Some(KEY), Vec::new(), KeyValidation::Valid)?;
        h.studio.start_camera()?;

        let oldest = h.studio.get_feedback()?.frame_id;
        for _ in 1..MAX_FRAMES {
            h.studio.get_feedback()?;
        }
        assert_eq!(h.studio.frames().len(), MAX_FRAMES);
        assert!(h.studio.select_compare(&oldest).is_some());

        let turn = h.studio.get_feedback()?;
        assert_eq!(turn.compare_frame_id.as_deref(), Some(oldest.as_str()));
        assert_eq!(
            h.calls.borrow().compare_ids.last().cloned().flatten(),
            Some(oldest.clone())
        );
        assert_eq!(h.studio.frames().len(), MAX_FRAMES);
        assert!(h.studio.frames().get(&oldest).is_none());
        Ok(())
    }

    #[test]
    fn history_sent_with_each_request_is_windowed() -> anyhow::Result<()> {
        let mut h = harness(Some(KEY), Vec::new(), KeyValidation::Valid)?;
        h.studio.start_camera()?;
        for _ in 0..12 {
            h.studio.get_feedback()?;
        }
        assert_eq!(h.studio.conversation().len(), 24);

        let calls = h.calls.borrow();
        let sizes: Vec<usize> = calls.messages.iter().map(Vec::len).collect();
        assert_eq!(sizes[..3], [1, 3, 5]);
        assert_eq!(sizes[10], MAX_HISTORY_ENTRIES + 1);
        assert_eq!(sizes[11], MAX_HISTORY_ENTRIES + 1);
        Ok(())
    }

    #[test]
    fn follow_up_needs_text_and_a_frame() -> anyhow::Result<()> {
        let mut h = harness(Some(KEY), Vec::new(), KeyValidation::Valid)?;
        assert!(matches!(
            h.studio.follow_up("   ").err(),
            Some(StudioError::EmptyFollowUp)
        ));
        assert!(matches!(
            h.studio.follow_up("thoughts?").err(),
            Some(StudioError::NoFrames)
        ));
        assert!(h.calls.borrow().messages.is_empty());
        Ok(())
    }

    #[test]
    fn submitted_key_is_checked_before_it_is_stored() -> anyhow::Result<()> {
        let mut h = harness(
            None,
            Vec::new(),
            KeyValidation::Invalid("Invalid API key".to_string()),
        )?;
        assert!(matches!(
            h.studio.submit_api_key("  ").err(),
            Some(StudioError::EmptyCredential)
        ));
        assert!(matches!(
            h.studio.submit_api_key("bad-key").err(),
            Some(StudioError::MalformedCredential)
        ));
        let rejected = h.studio.submit_api_key(KEY).err();
        assert_eq!(rejected.map(|err| err.to_string()).as_deref(), Some("Invalid API key"));
        assert_eq!(h.studio.credential(), None);

        let mut h = harness(None, Vec::new(), KeyValidation::RateLimited)?;
        h.studio.submit_api_key(&format!(" {KEY} "))?;
        assert_eq!(h.studio.credential().as_deref(), Some(KEY));
        h.studio.clear_api_key();
        assert_eq!(h.studio.credential(), None);
        Ok(())
    }

    #[test]
    fn fallback_credential_applies_only_without_stored_key() -> anyhow::Result<()> {
        let h = harness(None, Vec::new(), KeyValidation::Valid)?;
        let studio = h
            .studio
            .with_fallback_credential(Some("sk-ant-REDACTED".to_string()));
        assert_eq!(
            studio.credential().as_deref(),
            Some("sk-ant-REDACTED")
        );
        studio.prefs().set_api_key(Some(KEY));
        assert_eq!(studio.credential().as_deref(), Some(KEY));
        Ok(())
    }
}
