use http::Method;
use serde::Serialize;
use time::OffsetDateTime;

use common::envelope::Envelope;
use common::identity::Id;
use common::primitive::{Team, TeamType};

use super::{RegistryClient, RegistryError};

pub struct Teams<'a> {
    pub(crate) client: &'a RegistryClient,
}

/// Server-side team listing filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeamFilter {
    User,
    Machine,
    System,
    Any,
}

impl TeamFilter {
    fn query_value(self) -> Option<&'static str> {
        match self {
            TeamFilter::User => Some("user"),
            TeamFilter::Machine => Some("machine"),
            TeamFilter::System => Some("system"),
            TeamFilter::Any => None,
        }
    }
}

#[derive(Serialize)]
struct CreateTeam<'a> {
    org_id: &'a Id,
    name: &'a str,
    team_type: TeamType,
    #[serde(with = "time::serde::rfc3339")]
    created: OffsetDateTime,
}

impl Teams<'_> {
    pub async fn list(
        &self,
        org_id: &Id,
        name: Option<&str>,
        filter: TeamFilter,
    ) -> Result<Vec<Envelope<Team>>, RegistryError> {
        let mut query: Vec<(&str, String)> = vec![("org_id", org_id.to_string())];
        if let Some(name) = name {
            query.push(("name", name.to_string()));
        }
        if let Some(team_type) = filter.query_value() {
            query.push(("type", team_type.to_string()));
        }

        let builder = self.client.request(Method::GET, "/teams")?.query(&query);
        let teams: Vec<Envelope<Team>> = self.client.send_json(builder).await?;
        teams
            .into_iter()
            .map(|team| team.checked().map_err(RegistryError::from))
            .collect()
    }

    pub async fn create(
        &self,
        org_id: &Id,
        name: &str,
        team_type: TeamType,
    ) -> Result<Envelope<Team>, RegistryError> {
        let builder = self
            .client
            .request(Method::POST, "/teams")?
            .json(&CreateTeam {
                org_id,
                name,
                team_type,
                created: OffsetDateTime::now_utc(),
            });
        let envelope: Envelope<Team> = self.client.send_json(builder).await?;
        Ok(envelope.checked()?)
    }
}
