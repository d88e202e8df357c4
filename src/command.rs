//! Command Correlator: builders for every produced wire command shape in
//! spec.md §6's table, grounded on `original_source/command/*.go` and
//! `original_source/command/call/*.go`.

/// Implemented by every buildable ESL command. `build_message()` returns the
/// command text exactly as it should appear before `Connection::send_command`
/// appends the `\r\n\r\n` frame terminator.
pub trait Command: Send + Sync {
    fn build_message(&self) -> String;

    /// Whether this is a `bgapi` call (registers a one-shot bgapi callback
    /// on success, per spec.md §4.4).
    fn is_background_api(&self) -> bool {
        false
    }

    /// Whether `build_message()` legitimately embeds `\r\n` (sendevent/sendmsg
    /// header blocks). Such commands skip the `InvalidCommand` CR/LF check.
    fn allows_embedded_crlf(&self) -> bool {
        false
    }
}

/// `auth <password>` / `userauth <user>:<password>`.
pub struct Auth {
    pub user: Option<String>,
    pub password: String,
}

impl Auth {
    pub fn password(password: impl Into<String>) -> Self {
        Self { user: None, password: password.into() }
    }

    pub fn user_password(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self { user: Some(user.into()), password: password.into() }
    }
}

impl Command for Auth {
    fn build_message(&self) -> String {
        match &self.user {
            Some(user) => format!("userauth {user}:{}", self.password),
            None => format!("auth {}", self.password),
        }
    }
}

/// `api <command> <arguments>` / `bgapi <command> <arguments>`, the latter
/// optionally carrying a caller-supplied `Job-UUID:` header line so the
/// caller can pre-assign the job id instead of letting FreeSWITCH generate
/// one (spec.md §6 table, "optionally with `Job-UUID: <uuid>` header line").
pub struct Api {
    pub command: String,
    pub arguments: String,
    pub background: bool,
    pub job_uuid: Option<String>,
}

impl Api {
    pub fn new(command: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self { command: command.into(), arguments: arguments.into(), background: false, job_uuid: None }
    }

    pub fn background(command: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self { command: command.into(), arguments: arguments.into(), background: true, job_uuid: None }
    }

    /// `bgapi` with a caller-supplied job id, echoed back verbatim by
    /// FreeSWITCH in both the `+OK` reply and the eventual `BACKGROUND_JOB`.
    pub fn background_with_job_uuid(
        command: impl Into<String>,
        arguments: impl Into<String>,
        job_uuid: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into(),
            arguments: arguments.into(),
            background: true,
            job_uuid: Some(job_uuid.into()),
        }
    }

    /// As `background_with_job_uuid`, generating a fresh random job id.
    pub fn background_with_generated_job_uuid(
        command: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self::background_with_job_uuid(command, arguments, uuid::Uuid::new_v4().to_string())
    }
}

impl Command for Api {
    fn build_message(&self) -> String {
        let verb = if self.background { "bgapi" } else { "api" };
        let base = if self.arguments.is_empty() {
            format!("{verb} {}", self.command)
        } else {
            format!("{verb} {} {}", self.command, self.arguments)
        };
        match &self.job_uuid {
            Some(job_uuid) if self.background => format!("{base}\r\nJob-UUID: {job_uuid}"),
            _ => base,
        }
    }

    fn is_background_api(&self) -> bool {
        self.background
    }

    fn allows_embedded_crlf(&self) -> bool {
        self.background && self.job_uuid.is_some()
    }
}

/// `event <format> <name> <name> ...` / `nixevent <format> <name> ...`.
pub struct Event {
    pub ignore: bool,
    pub format: String,
    pub listen: Vec<String>,
}

impl Event {
    pub fn listen(format: impl Into<String>, names: impl IntoIterator<Item = String>) -> Self {
        Self { ignore: false, format: format.into(), listen: names.into_iter().collect() }
    }

    pub fn ignore(format: impl Into<String>, names: impl IntoIterator<Item = String>) -> Self {
        Self { ignore: true, format: format.into(), listen: names.into_iter().collect() }
    }
}

impl Command for Event {
    fn build_message(&self) -> String {
        let verb = if self.ignore { "nixevent" } else { "event" };
        format!("{verb} {} {}", self.format, self.listen.join(" "))
    }
}

/// `myevents <format>` / `myevents <format> <uuid>`.
pub struct MyEvents {
    pub format: String,
    pub uuid: Option<String>,
}

impl MyEvents {
    pub fn new(format: impl Into<String>) -> Self {
        Self { format: format.into(), uuid: None }
    }

    pub fn for_uuid(format: impl Into<String>, uuid: impl Into<String>) -> Self {
        Self { format: format.into(), uuid: Some(uuid.into()) }
    }
}

impl Command for MyEvents {
    fn build_message(&self) -> String {
        match &self.uuid {
            Some(uuid) => format!("myevents {} {uuid}", self.format),
            None => format!("myevents {}", self.format),
        }
    }
}

/// `noevents`.
pub struct DisableEvents;

impl Command for DisableEvents {
    fn build_message(&self) -> String {
        "noevents".to_string()
    }
}

/// `divert_events on` / `divert_events off`.
pub struct DivertEvents {
    pub enabled: bool,
}

impl Command for DivertEvents {
    fn build_message(&self) -> String {
        format!("divert_events {}", if self.enabled { "on" } else { "off" })
    }
}

/// `linger` / `linger <seconds>` / `nolinger`.
pub struct Linger {
    pub enabled: bool,
    pub seconds: Option<u32>,
}

impl Linger {
    pub fn on() -> Self {
        Self { enabled: true, seconds: None }
    }

    pub fn on_for(seconds: u32) -> Self {
        Self { enabled: true, seconds: Some(seconds) }
    }

    pub fn off() -> Self {
        Self { enabled: false, seconds: None }
    }
}

impl Command for Linger {
    fn build_message(&self) -> String {
        if !self.enabled {
            return "nolinger".to_string();
        }
        match self.seconds {
            Some(s) => format!("linger {s}"),
            None => "linger".to_string(),
        }
    }
}

/// `log <level>` / `nolog`.
pub struct Log {
    pub enabled: bool,
    pub level: Option<u8>,
}

impl Log {
    pub fn at_level(level: u8) -> Self {
        Self { enabled: true, level: Some(level) }
    }

    pub fn off() -> Self {
        Self { enabled: false, level: None }
    }
}

impl Command for Log {
    fn build_message(&self) -> String {
        if !self.enabled {
            return "nolog".to_string();
        }
        match self.level {
            Some(l) => format!("log {l}"),
            None => "log".to_string(),
        }
    }
}

/// `filter <header> <value>`.
pub struct Filter {
    pub header: String,
    pub value: String,
}

impl Command for Filter {
    fn build_message(&self) -> String {
        format!("filter {} {}", self.header, self.value)
    }
}

/// `connect`.
pub struct Connect;

impl Command for Connect {
    fn build_message(&self) -> String {
        "connect".to_string()
    }
}

/// `exit`.
pub struct Exit;

impl Command for Exit {
    fn build_message(&self) -> String {
        "exit".to_string()
    }
}

/// `sendevent <name>\r\n<headers>[\r\n\r\n<body>]`.
pub struct SendEvent {
    pub name: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl SendEvent {
    pub fn new(name: impl Into<String>, headers: Vec<(String, String)>, body: Option<String>) -> Self {
        Self { name: name.into(), headers, body }
    }
}

impl Command for SendEvent {
    fn build_message(&self) -> String {
        let mut s = format!("sendevent {}\r\n", self.name);
        s.push_str(&header_lines(&self.headers));
        if let Some(body) = &self.body {
            s.push_str("\r\n\r\n");
            s.push_str(body);
        }
        s
    }

    fn allows_embedded_crlf(&self) -> bool {
        true
    }
}

/// General `sendmsg [uuid]\r\n<headers>[\r\n\r\n<body>]`, the shared
/// mechanism behind `Execute`, `Hangup`, `NoMedia`, and `Transfer`.
pub struct SendMsg {
    pub uuid: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

const EXECUTE_BODY_THRESHOLD: usize = 2048;

impl SendMsg {
    /// `execute` call command. Falls back to a body (`content-type: text/plain`
    /// + `content-length`) instead of an `execute-app-arg` header when the
    /// application arguments exceed 2048 bytes or `force_body` is set
    /// (grounded on `command/call/execute.go`).
    pub fn execute(
        uuid: Option<String>,
        app_name: impl Into<String>,
        app_args: impl Into<String>,
        loops: u32,
        force_body: bool,
        event_uuid: Option<String>,
    ) -> Self {
        let app_args = app_args.into();
        let loops = if loops == 0 { 1 } else { loops };
        let mut headers = vec![
            ("call-command".to_string(), "execute".to_string()),
            ("execute-app-name".to_string(), app_name.into()),
            ("loops".to_string(), loops.to_string()),
        ];
        if let Some(event_uuid) = event_uuid {
            headers.push(("Event-UUID".to_string(), event_uuid));
        }
        let body = if force_body || app_args.len() > EXECUTE_BODY_THRESHOLD {
            headers.push(("content-type".to_string(), "text/plain".to_string()));
            headers.push(("content-length".to_string(), app_args.len().to_string()));
            Some(app_args.into_bytes())
        } else {
            headers.push(("execute-app-arg".to_string(), app_args));
            None
        };
        Self { uuid, headers, body }
    }

    pub fn hangup(uuid: Option<String>, cause: impl Into<String>) -> Self {
        Self {
            uuid,
            headers: vec![
                ("call-command".to_string(), "hangup".to_string()),
                ("hangup-cause".to_string(), cause.into()),
            ],
            body: None,
        }
    }

    pub fn nomedia(uuid: Option<String>, nomedia_uuid: impl Into<String>) -> Self {
        Self {
            uuid,
            headers: vec![
                ("call-command".to_string(), "nomedia".to_string()),
                ("nomedia-uuid".to_string(), nomedia_uuid.into()),
            ],
            body: None,
        }
    }

    pub fn transfer(uuid: Option<String>, application: impl Into<String>) -> Self {
        Self {
            uuid,
            headers: vec![
                ("call-command".to_string(), "xferext".to_string()),
                ("application".to_string(), application.into()),
            ],
            body: None,
        }
    }
}

impl Command for SendMsg {
    fn build_message(&self) -> String {
        let mut s = String::from("sendmsg");
        if let Some(uuid) = &self.uuid {
            s.push(' ');
            s.push_str(uuid);
        }
        s.push_str("\r\n");
        s.push_str(&header_lines(&self.headers));
        if let Some(body) = &self.body {
            s.push_str("\r\n\r\n");
            s.push_str(&String::from_utf8_lossy(body));
        }
        s
    }

    fn allows_embedded_crlf(&self) -> bool {
        true
    }
}

fn header_lines(headers: &[(String, String)]) -> String {
    headers
        .iter()
        .map(|(k, v)| format!("{k}: {v}"))
        .collect::<Vec<_>>()
        .join("\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_builds_plain_password() {
        assert_eq!(Auth::password("ClueCon").build_message(), "auth ClueCon");
    }

    #[test]
    fn api_builds_verb_and_background_variant() {
        assert_eq!(Api::new("status", "").build_message(), "api status");
        assert_eq!(
            Api::background("originate", "sofia/gw/foo 1000").build_message(),
            "bgapi originate sofia/gw/foo 1000"
        );
        assert!(Api::background("x", "").is_background_api());
    }

    #[test]
    fn bgapi_with_caller_supplied_job_uuid_appends_header_line() {
        let cmd = Api::background_with_job_uuid("status", "", "7d6594c1-fake-uuid");
        assert_eq!(cmd.build_message(), "bgapi status\r\nJob-UUID: 7d6594c1-fake-uuid");
        assert!(cmd.allows_embedded_crlf());
    }

    #[test]
    fn bgapi_with_generated_job_uuid_is_parseable() {
        let cmd = Api::background_with_generated_job_uuid("status", "");
        let uuid = cmd.job_uuid.as_ref().unwrap();
        assert!(uuid::Uuid::parse_str(uuid).is_ok());
    }

    #[test]
    fn event_and_nixevent_verbs() {
        assert_eq!(
            Event::listen("plain", ["CHANNEL_CREATE".to_string(), "CHANNEL_ANSWER".to_string()])
                .build_message(),
            "event plain CHANNEL_CREATE CHANNEL_ANSWER"
        );
        assert_eq!(
            Event::ignore("plain", ["BACKGROUND_JOB".to_string()]).build_message(),
            "nixevent plain BACKGROUND_JOB"
        );
    }

    #[test]
    fn linger_variants() {
        assert_eq!(Linger::on().build_message(), "linger");
        assert_eq!(Linger::on_for(60).build_message(), "linger 60");
        assert_eq!(Linger::off().build_message(), "nolinger");
    }

    #[test]
    fn execute_uses_header_arg_under_threshold() {
        let cmd = SendMsg::execute(Some("u".into()), "playback", "short.wav", 1, false, None);
        let msg = cmd.build_message();
        assert!(msg.contains("execute-app-arg: short.wav"));
        assert!(cmd.body.is_none());
    }

    #[test]
    fn execute_switches_to_body_over_threshold() {
        let long_args = "x".repeat(EXECUTE_BODY_THRESHOLD + 1);
        let cmd = SendMsg::execute(Some("u".into()), "playback", long_args.clone(), 1, false, None);
        assert!(cmd.body.is_some());
        let msg = cmd.build_message();
        assert!(msg.contains("content-length"));
        assert!(msg.ends_with(&long_args));
    }

    #[test]
    fn execute_force_body_overrides_threshold() {
        let cmd = SendMsg::execute(None, "playback", "short.wav", 1, true, None);
        assert!(cmd.body.is_some());
    }

    #[test]
    fn execute_defaults_zero_loops_to_one() {
        let cmd = SendMsg::execute(None, "playback", "a.wav", 0, false, None);
        assert!(cmd.headers.iter().any(|(k, v)| k == "loops" && v == "1"));
    }

    #[test]
    fn sendmsg_without_body_has_no_trailing_blank_line() {
        let cmd = SendMsg::hangup(Some("uuid-1".into()), "NORMAL_CLEARING");
        assert_eq!(
            cmd.build_message(),
            "sendmsg uuid-1\r\ncall-command: hangup\r\nhangup-cause: NORMAL_CLEARING"
        );
    }

    #[test]
    fn transfer_sends_xferext_with_application_header() {
        let cmd = SendMsg::transfer(Some("uuid-1".into()), "9999 XML default");
        assert_eq!(
            cmd.build_message(),
            "sendmsg uuid-1\r\ncall-command: xferext\r\napplication: 9999 XML default"
        );
    }

    #[test]
    fn commands_with_crlf_bodies_are_exempted_from_the_crlf_check() {
        assert!(SendMsg::hangup(None, "NORMAL_CLEARING").allows_embedded_crlf());
        assert!(!Auth::password("x").allows_embedded_crlf());
    }
}
