//! ICE transport blocks: candidates, fingerprints and ICE parameters.
//!
//! The transport block rides on offers, answers and transport-info updates.
//! Candidate protocol is kept as a raw string so that unknown transports
//! received from a peer degrade to a skipped candidate instead of a failed
//! parse (RFC 8839 allows extension transports).

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::JingleError;

/// ICE candidate type (RFC 8445).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateKind {
    /// Candidate obtained from a local interface.
    Host,
    /// Peer-reflexive candidate learned from a check.
    Prflx,
    /// Server-reflexive candidate learned via STUN.
    Srflx,
    /// Relayed candidate allocated on a TURN server.
    Relay,
}

impl CandidateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Prflx => "prflx",
            Self::Srflx => "srflx",
            Self::Relay => "relay",
        }
    }
}

impl fmt::Display for CandidateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CandidateKind {
    type Err = JingleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "host" => Ok(Self::Host),
            "prflx" => Ok(Self::Prflx),
            "srflx" => Ok(Self::Srflx),
            "relay" => Ok(Self::Relay),
            other => Err(JingleError::invalid("candidate type", other)),
        }
    }
}

/// One ICE candidate as carried on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Unique id for this candidate within the session.
    pub id: String,
    /// Foundation, equal for candidates from the same base.
    pub foundation: String,
    /// Component id (1 for RTP, 2 for RTCP; always 1 with rtcp-mux).
    pub component: u8,
    /// Transport protocol, lowercase ("udp", "tcp", or an extension).
    pub protocol: String,
    /// Candidate priority.
    pub priority: u32,
    /// Connection address.
    pub address: IpAddr,
    /// Connection port.
    pub port: u16,
    /// Candidate type.
    pub kind: CandidateKind,
    /// Related address for reflexive/relay candidates.
    pub related_address: Option<IpAddr>,
    /// Related port for reflexive/relay candidates.
    pub related_port: Option<u16>,
    /// ICE restart generation this candidate belongs to.
    pub generation: u32,
}

impl IceCandidate {
    /// True when the candidate uses UDP.
    pub fn is_udp(&self) -> bool {
        self.protocol.eq_ignore_ascii_case("udp")
    }

    /// True when the candidate uses TCP.
    pub fn is_tcp(&self) -> bool {
        self.protocol.eq_ignore_ascii_case("tcp")
    }
}

impl fmt::Display for IceCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}:{} typ {}",
            self.foundation, self.component, self.protocol, self.priority, self.address, self.port, self.kind
        )
    }
}

/// DTLS role advertised alongside a fingerprint (RFC 4145).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Setup {
    /// This party initiates the DTLS handshake.
    Active,
    /// This party awaits the DTLS handshake.
    Passive,
    /// This party can take either role.
    Actpass,
}

impl fmt::Display for Setup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Passive => "passive",
            Self::Actpass => "actpass",
        };
        f.write_str(s)
    }
}

/// DTLS certificate fingerprint (XEP-0320).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Hash function name, e.g. "sha-256".
    pub hash: String,
    /// Colon-separated hex digest.
    pub value: String,
    /// DTLS role, when advertised.
    pub setup: Option<Setup>,
}

impl Fingerprint {
    pub fn new(hash: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            value: value.into(),
            setup: None,
        }
    }

    pub fn with_setup(mut self, setup: Setup) -> Self {
        self.setup = Some(setup);
        self
    }
}

/// ICE username fragment and password for one media stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceParameters {
    pub ufrag: String,
    pub pwd: String,
}

impl IceParameters {
    pub fn new(ufrag: impl Into<String>, pwd: impl Into<String>) -> Self {
        Self {
            ufrag: ufrag.into(),
            pwd: pwd.into(),
        }
    }
}

/// ICE transport block of one content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct IceTransport {
    /// ICE username fragment.
    pub ufrag: Option<String>,
    /// ICE password.
    pub pwd: Option<String>,
    /// DTLS fingerprint.
    pub fingerprint: Option<Fingerprint>,
    /// Candidates carried in this block, possibly empty.
    pub candidates: Vec<IceCandidate>,
}

impl IceTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parameters(mut self, params: IceParameters) -> Self {
        self.ufrag = Some(params.ufrag);
        self.pwd = Some(params.pwd);
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    pub fn add_candidate(mut self, candidate: IceCandidate) -> Self {
        self.candidates.push(candidate);
        self
    }

    /// ICE parameters, when both halves are present.
    pub fn parameters(&self) -> Option<IceParameters> {
        match (&self.ufrag, &self.pwd) {
            (Some(ufrag), Some(pwd)) => Some(IceParameters::new(ufrag.clone(), pwd.clone())),
            _ => None,
        }
    }

    /// Candidates usable under the given protocol policy.
    ///
    /// Candidates with a protocol that is neither UDP nor TCP are skipped
    /// with a warning rather than failing the whole block.
    pub fn usable_candidates(&self, allow_udp: bool, allow_tcp: bool) -> Vec<&IceCandidate> {
        self.candidates
            .iter()
            .filter(|c| {
                if c.is_udp() {
                    allow_udp
                } else if c.is_tcp() {
                    allow_tcp
                } else {
                    warn!("skipping candidate with unsupported protocol: {}", c.protocol);
                    false
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn candidate(protocol: &str) -> IceCandidate {
        IceCandidate {
            id: "c1".to_string(),
            foundation: "1".to_string(),
            component: 1,
            protocol: protocol.to_string(),
            priority: 2_130_706_431,
            address: "192.0.2.10".parse().unwrap(),
            port: 10000,
            kind: CandidateKind::Host,
            related_address: None,
            related_port: None,
            generation: 0,
        }
    }

    #[test]
    fn candidate_kind_round_trips() {
        for kind in [
            CandidateKind::Host,
            CandidateKind::Prflx,
            CandidateKind::Srflx,
            CandidateKind::Relay,
        ] {
            assert_eq!(kind.as_str().parse::<CandidateKind>().unwrap(), kind);
        }
        assert!("bogus".parse::<CandidateKind>().is_err());
    }

    #[test]
    fn usable_candidates_filters_by_protocol() {
        let transport = IceTransport::new()
            .add_candidate(candidate("udp"))
            .add_candidate(candidate("tcp"))
            .add_candidate(candidate("sctp"));

        assert_eq!(transport.usable_candidates(true, true).len(), 2);
        assert_eq!(transport.usable_candidates(true, false).len(), 1);
        assert_eq!(transport.usable_candidates(false, false).len(), 0);
    }

    #[test]
    fn parameters_require_both_halves() {
        let transport = IceTransport {
            ufrag: Some("ufrag1".to_string()),
            pwd: None,
            fingerprint: None,
            candidates: vec![],
        };
        assert!(transport.parameters().is_none());

        let transport = transport.with_parameters(IceParameters::new("u", "p"));
        let params = transport.parameters().expect("parameters");
        assert_eq!(params.ufrag, "u");
        assert_eq!(params.pwd, "p");
    }
}
