use std::fmt;

/// The `type` discriminator of an [`Envelope`](crate::Envelope).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Kind {
    Cmd,
    CmdResult,
    CmdError,
    Broadcast,
    HmrReload,
    HmrCssUpdate,
    HmrJsUpdate,
    NotifyUpdate,
    Other(String),
}

impl Kind {
    pub fn as_str(&self) -> &str {
        use Kind::*;
        match self {
            Cmd => "cmd",
            CmdResult => "cmd_result",
            CmdError => "cmd_error",
            Broadcast => "broadcast",
            HmrReload => "hmr::reload",
            HmrCssUpdate => "hmr::css_update",
            HmrJsUpdate => "hmr::js_update",
            NotifyUpdate => "notify::update",
            Other(s) => s,
        }
    }

    /// Kinds the backend sends without being asked.
    pub fn is_push(&self) -> bool {
        use Kind::*;
        matches!(
            self,
            Broadcast | HmrReload | HmrCssUpdate | HmrJsUpdate | NotifyUpdate
        )
    }

    pub fn is_response(&self) -> bool {
        matches!(self, Kind::CmdResult | Kind::CmdError)
    }
}

impl From<&str> for Kind {
    fn from(s: &str) -> Self {
        use Kind::*;
        match s {
            "cmd" => Cmd,
            "cmd_result" => CmdResult,
            "cmd_error" => CmdError,
            "broadcast" => Broadcast,
            "hmr::reload" => HmrReload,
            "hmr::css_update" => HmrCssUpdate,
            "hmr::js_update" => HmrJsUpdate,
            "notify::update" => NotifyUpdate,
            other => Other(other.to_string()),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[test]
fn test_kind_roundtrips_through_str() {
    for kind in [
        Kind::Cmd,
        Kind::CmdResult,
        Kind::CmdError,
        Kind::Broadcast,
        Kind::HmrReload,
        Kind::HmrCssUpdate,
        Kind::HmrJsUpdate,
        Kind::NotifyUpdate,
    ] {
        assert_eq!(Kind::from(kind.as_str()), kind);
    }
    assert_eq!(Kind::from("weird"), Kind::Other("weird".to_string()));
    assert!(!Kind::from("weird").is_push());
}
