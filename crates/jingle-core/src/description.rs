//! Structured session description: media sections, sources and their owners.
//!
//! The media engine speaks this document instead of raw SDP text. Sections
//! keep offer order, and each section carries the transport material for its
//! media stream. Conversion to and from Jingle contents is lossless for the
//! fields this stack negotiates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::candidate::{Fingerprint, IceCandidate, IceParameters, IceTransport};
use crate::error::JingleError;
use crate::payload::{Content, ContentName, Creator, Senders};
use crate::types::EndpointId;

/// Media kind of one section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = JingleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "audio" => Ok(Self::Audio),
            "video" => Ok(Self::Video),
            other => Err(JingleError::invalid("media", other)),
        }
    }
}

/// Named parameter attached to a source (cname, msid, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceParameter {
    pub name: String,
    pub value: Option<String>,
}

impl SourceParameter {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }
}

/// One media source (RFC 5576 SSRC) with its advertised ownership.
///
/// The id is kept as the raw wire string; a source whose id does not parse
/// as an SSRC is carried but never enters the source binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    /// SSRC as written on the wire.
    pub id: String,
    /// Endpoint that owns this source, when advertised.
    pub owner: Option<EndpointId>,
    /// Source parameters in wire order.
    pub parameters: Vec<SourceParameter>,
}

impl SourceEntry {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            owner: None,
            parameters: Vec::new(),
        }
    }

    pub fn with_owner(mut self, owner: EndpointId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn add_parameter(mut self, parameter: SourceParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// The SSRC as a number, when the wire id is well formed.
    pub fn ssrc(&self) -> Option<u32> {
        self.id.parse().ok()
    }

    /// Value of a named parameter.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|p| p.name == name)
            .and_then(|p| p.value.as_deref())
    }
}

/// Media description element of one Jingle content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaDescription {
    /// Media kind of the stream.
    pub media: MediaKind,
    /// Sources advertised for this stream.
    pub sources: Vec<SourceEntry>,
    /// Receiver constraint on decoded frame height, when present.
    pub max_frame_height: Option<u32>,
}

impl MediaDescription {
    pub fn new(media: MediaKind) -> Self {
        Self {
            media,
            sources: Vec::new(),
            max_frame_height: None,
        }
    }

    pub fn add_source(mut self, source: SourceEntry) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_max_frame_height(mut self, height: u32) -> Self {
        self.max_frame_height = Some(height);
        self
    }
}

/// One media section of a session description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaSection {
    /// Content name, unique within the session.
    pub name: ContentName,
    /// Media kind.
    pub media: MediaKind,
    /// Media stream identification tag; equals the content name here.
    pub mid: String,
    /// Direction of the section.
    pub senders: Senders,
    /// ICE credentials for this stream.
    pub ice: Option<IceParameters>,
    /// DTLS fingerprint for this stream.
    pub fingerprint: Option<Fingerprint>,
    /// Candidates known at description time, possibly empty.
    pub candidates: Vec<IceCandidate>,
    /// Sources advertised in this section.
    pub sources: Vec<SourceEntry>,
    /// Receiver constraint on decoded frame height.
    pub max_frame_height: Option<u32>,
}

impl MediaSection {
    pub fn new(name: ContentName, media: MediaKind) -> Self {
        let mid = name.as_str().to_string();
        Self {
            name,
            media,
            mid,
            senders: Senders::Both,
            ice: None,
            fingerprint: None,
            candidates: Vec::new(),
            sources: Vec::new(),
            max_frame_height: None,
        }
    }

    /// Sources whose wire id parses as an SSRC.
    pub fn valid_sources(&self) -> impl Iterator<Item = (u32, &SourceEntry)> {
        self.sources.iter().filter_map(|s| s.ssrc().map(|id| (id, s)))
    }
}

/// Ordered collection of media sections negotiated for a session.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Sections in offer order.
    pub contents: Vec<MediaSection>,
}

impl SessionDescription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_section(mut self, section: MediaSection) -> Self {
        self.contents.push(section);
        self
    }

    /// Find a section by content name.
    pub fn section(&self, name: &ContentName) -> Option<&MediaSection> {
        self.contents.iter().find(|s| &s.name == name)
    }

    /// Find a section by content name, mutably.
    pub fn section_mut(&mut self, name: &ContentName) -> Option<&mut MediaSection> {
        self.contents.iter_mut().find(|s| &s.name == name)
    }

    /// Find the first section of a media kind.
    pub fn section_for_media(&self, media: MediaKind) -> Option<&MediaSection> {
        self.contents.iter().find(|s| s.media == media)
    }

    /// Build a description from the contents of an offer or answer.
    ///
    /// Contents without a media description (pure transport updates) are
    /// skipped. A content whose description carries an unknown media kind has
    /// already failed parsing upstream and cannot reach this point.
    pub fn from_contents(contents: &[Content]) -> Self {
        let mut description = Self::new();
        for content in contents {
            let Some(media_description) = &content.description else {
                continue;
            };
            let mut section = MediaSection::new(content.name.clone(), media_description.media);
            section.senders = content.senders.unwrap_or(Senders::Both);
            section.sources = media_description.sources.clone();
            section.max_frame_height = media_description.max_frame_height;
            if let Some(transport) = &content.transport {
                section.ice = transport.parameters();
                section.fingerprint = transport.fingerprint.clone();
                section.candidates = transport.candidates.clone();
            }
            description.contents.push(section);
        }
        description
    }

    /// Render the description as Jingle contents created by the given party.
    pub fn to_contents(&self, creator: Creator) -> Vec<Content> {
        self.contents
            .iter()
            .map(|section| {
                let mut media_description = MediaDescription::new(section.media);
                media_description.sources = section.sources.clone();
                media_description.max_frame_height = section.max_frame_height;

                let mut transport = IceTransport::new();
                if let Some(ice) = &section.ice {
                    transport = transport.with_parameters(ice.clone());
                }
                if let Some(fingerprint) = &section.fingerprint {
                    transport = transport.with_fingerprint(fingerprint.clone());
                }
                transport.candidates = section.candidates.clone();

                Content::new(creator, section.name.clone())
                    .with_senders(section.senders)
                    .with_description(media_description)
                    .with_transport(transport)
            })
            .collect()
    }

    /// Merge sources announced by a source-add into the matching sections.
    ///
    /// Returns the number of sources actually added. Sources for a content
    /// this description does not carry are dropped with a warning; duplicates
    /// (same wire id in the same section) are ignored.
    pub fn merge_sources(&mut self, additions: &[Content]) -> usize {
        let mut added = 0;
        for content in additions {
            let Some(media_description) = &content.description else {
                continue;
            };
            let Some(section) = self.section_mut(&content.name) else {
                warn!("dropping sources for unknown content {}", content.name);
                continue;
            };
            for source in &media_description.sources {
                if section.sources.iter().any(|s| s.id == source.id) {
                    continue;
                }
                section.sources.push(source.clone());
                added += 1;
            }
        }
        added
    }

    /// Remove sources announced by a source-remove from the matching sections.
    ///
    /// Returns the removed entries so callers can retire dependent state.
    pub fn remove_sources(&mut self, removals: &[Content]) -> Vec<SourceEntry> {
        let mut removed = Vec::new();
        for content in removals {
            let Some(media_description) = &content.description else {
                continue;
            };
            let Some(section) = self.section_mut(&content.name) else {
                warn!("dropping source removal for unknown content {}", content.name);
                continue;
            };
            for source in &media_description.sources {
                if let Some(pos) = section.sources.iter().position(|s| s.id == source.id) {
                    removed.push(section.sources.remove(pos));
                }
            }
        }
        removed
    }

    /// Replace the transport material of every section, dropping stale
    /// candidates from the previous ICE generation.
    pub fn replace_transport(&mut self, transport: &IceTransport) {
        for section in &mut self.contents {
            section.ice = transport.parameters();
            section.fingerprint = transport.fingerprint.clone();
            section.candidates.clear();
        }
    }

    /// Change the direction of the named section. Returns false when the
    /// section does not exist.
    pub fn set_senders(&mut self, name: &ContentName, senders: Senders) -> bool {
        match self.section_mut(name) {
            Some(section) => {
                section.senders = senders;
                true
            }
            None => false,
        }
    }

    /// All well-formed SSRCs with their owning endpoint.
    pub fn source_owners(&self) -> impl Iterator<Item = (u32, &EndpointId)> {
        self.contents.iter().flat_map(|section| {
            section
                .valid_sources()
                .filter_map(|(ssrc, source)| source.owner.as_ref().map(|owner| (ssrc, owner)))
        })
    }

    /// All well-formed SSRCs across every section.
    pub fn ssrcs(&self) -> Vec<u32> {
        self.contents
            .iter()
            .flat_map(|section| section.valid_sources().map(|(ssrc, _)| ssrc))
            .collect()
    }
}
