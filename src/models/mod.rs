use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Identity of a link.
///
/// Links created locally carry a `Temp` id until the backend answers the create
/// request; after that every reference is rewritten to the `Server` id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityId {
    Temp(String),
    Server(u64),
}

impl EntityId {
    pub fn is_temp(&self) -> bool {
        matches!(self, EntityId::Temp(_))
    }

    pub fn server_id(&self) -> Option<u64> {
        match self {
            EntityId::Server(id) => Some(*id),
            EntityId::Temp(_) => None,
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Temp(id) => write!(f, "{id}"),
            EntityId::Server(id) => write!(f, "{id}"),
        }
    }
}

impl Serialize for EntityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            EntityId::Server(id) => serializer.serialize_u64(*id),
            EntityId::Temp(id) => serializer.serialize_str(id),
        }
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Backend ids have been observed both as numbers and as numeric strings.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Number(id) => EntityId::Server(id),
            Raw::Text(s) => match s.trim().parse::<u64>() {
                Ok(id) => EntityId::Server(id),
                Err(_) => EntityId::Temp(s),
            },
        })
    }
}

#[derive(
    Serialize,
    Deserialize,
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LinkKind {
    #[default]
    Generic,
    Whatsapp,
    Email,
    Phone,
    /// Kinds this client does not know yet; normalized like generic links.
    #[serde(other)]
    Unknown,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Link {
    pub id: EntityId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub kind: LinkKind,
    #[serde(default, alias = "order")]
    pub position: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SocialIcon {
    /// Natural key: at most one icon per type.
    pub social_type: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, alias = "order")]
    pub position: u32,
}

/// The in-memory working copy of the profile being edited.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileDraft {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub avatar: Option<String>,

    /// Design tokens are opaque to the sync engine.
    #[serde(default)]
    pub design: serde_json::Value,

    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default)]
    pub social_icons: Vec<SocialIcon>,
}

impl ProfileDraft {
    /// Sort both collections by their stored position and renumber them densely.
    pub fn normalize_order(&mut self) {
        self.links.sort_by_key(|l| l.position);
        self.social_icons.sort_by_key(|s| s.position);
        self.renumber_links();
        self.renumber_social_icons();
    }

    pub fn renumber_links(&mut self) {
        for (i, l) in self.links.iter_mut().enumerate() {
            l.position = i as u32;
        }
    }

    pub fn renumber_social_icons(&mut self) {
        for (i, s) in self.social_icons.iter_mut().enumerate() {
            s.position = i as u32;
        }
    }

    pub fn link(&self, id: &EntityId) -> Option<&Link> {
        self.links.iter().find(|l| &l.id == id)
    }

    pub fn link_mut(&mut self, id: &EntityId) -> Option<&mut Link> {
        self.links.iter_mut().find(|l| &l.id == id)
    }

    pub fn link_index(&self, id: &EntityId) -> Option<usize> {
        self.links.iter().position(|l| &l.id == id)
    }

    pub fn link_order(&self) -> Vec<EntityId> {
        self.links.iter().map(|l| l.id.clone()).collect()
    }

    pub fn social_icon_index(&self, social_type: &str) -> Option<usize> {
        self.social_icons
            .iter()
            .position(|s| s.social_type == social_type)
    }

    /// Rewrite a temp id to the server id. Returns false if no link carried it.
    pub fn swap_temp_link_id(&mut self, tmp_id: &EntityId, server_id: u64) -> bool {
        if let Some(l) = self.link_mut(tmp_id) {
            l.id = EntityId::Server(server_id);
            true
        } else {
            false
        }
    }
}
