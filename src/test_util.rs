//! Fixtures shared by the unit tests: Star Wars operations, canned responses and a
//! recording HTTP transport.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::runtime::Runtime;

use crate::{
    GraphCacheError, Result,
    http::{HttpCallFactory, HttpRequest, HttpResponse},
    model::{IdFieldResolver, Operation, OperationKind, OperationRequest, ResponseField, Variables},
    runtime::{CachePolicy, CallEnv, CallTracker},
    store::{MemoryCache, Store},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub id: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hero {
    pub id: Option<String>,
    pub name: String,
    pub friends: Vec<Character>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeroData {
    pub hero: Option<Hero>,
}

pub struct HeroQuery {
    episode: String,
}

impl HeroQuery {
    pub fn new(episode: &str) -> Self {
        Self {
            episode: episode.to_string(),
        }
    }
}

impl Operation for HeroQuery {
    type Data = HeroData;

    fn name(&self) -> &str {
        "HeroQuery"
    }

    fn document(&self) -> &str {
        "query HeroQuery($episode: Episode) { hero(episode: $episode) { id name friends { id name } } }"
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Query
    }

    fn variables(&self) -> Variables {
        hero_variables(&self.episode)
    }

    fn selections(&self) -> Vec<ResponseField> {
        hero_selections()
    }
}

pub fn hero_selections() -> Vec<ResponseField> {
    vec![
        ResponseField::object(
            "hero",
            vec![
                ResponseField::scalar("id").optional(),
                ResponseField::scalar("name"),
                ResponseField::list("friends", vec![ResponseField::scalar("id").optional(), ResponseField::scalar("name")]).optional(),
            ],
        )
        .argument("episode", ResponseField::variable("episode"))
        .optional(),
    ]
}

pub fn hero_variables(episode: &str) -> Variables {
    let mut variables = Variables::new();
    variables.insert("episode".to_string(), json!(episode));
    variables
}

pub fn hero_request(episode: &str) -> OperationRequest {
    OperationRequest::from_operation(&HeroQuery::new(episode))
}

pub fn hero_data(
    id: &str,
    name: &str,
) -> HeroData {
    HeroData {
        hero: Some(Hero {
            id: Some(id.to_string()),
            name: name.to_string(),
            friends: vec![Character {
                id: Some("1000".to_string()),
                name: "Luke Skywalker".to_string(),
            }],
        }),
    }
}

/// `data` of a `HeroQuery` response.
pub fn hero_response(
    id: &str,
    name: &str,
) -> Value {
    json!({
        "hero": {
            "id": id,
            "name": name,
            "friends": [{ "id": "1000", "name": "Luke Skywalker" }]
        }
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateHeroData {
    #[serde(rename = "updateHero")]
    pub update_hero: Option<Character>,
}

pub struct UpdateHeroMutation {
    id: String,
    name: String,
}

impl UpdateHeroMutation {
    pub fn new(
        id: &str,
        name: &str,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
        }
    }

    pub fn data(
        id: &str,
        name: &str,
    ) -> UpdateHeroData {
        UpdateHeroData {
            update_hero: Some(Character {
                id: Some(id.to_string()),
                name: name.to_string(),
            }),
        }
    }
}

impl Operation for UpdateHeroMutation {
    type Data = UpdateHeroData;

    fn name(&self) -> &str {
        "UpdateHero"
    }

    fn document(&self) -> &str {
        "mutation UpdateHero($id: ID!, $name: String!) { updateHero(id: $id, name: $name) { id name } }"
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Mutation
    }

    fn variables(&self) -> Variables {
        let mut variables = Variables::new();
        variables.insert("id".to_string(), json!(self.id));
        variables.insert("name".to_string(), json!(self.name));
        variables
    }

    fn selections(&self) -> Vec<ResponseField> {
        vec![
            ResponseField::object("updateHero", vec![ResponseField::scalar("id").optional(), ResponseField::scalar("name")])
                .argument("id", ResponseField::variable("id"))
                .argument("name", ResponseField::variable("name"))
                .optional(),
        ]
    }
}

/// `data` of an `UpdateHero` response.
pub fn update_hero_response(
    id: &str,
    name: &str,
) -> Value {
    json!({ "updateHero": { "id": id, "name": name } })
}

pub fn test_store() -> Arc<Store> {
    Arc::new(Store::new(Box::new(MemoryCache::new()), Arc::new(IdFieldResolver::default())))
}

/// Call environment on `runtime` with an in-memory store and `http` as the transport.
pub(crate) fn test_env(
    runtime: &Runtime,
    http: Arc<dyn HttpCallFactory>,
) -> Arc<CallEnv> {
    Arc::new(CallEnv {
        store: test_store(),
        http,
        tracker: Arc::new(CallTracker::new()),
        handle: runtime.handle().clone(),
        server_url: "http://localhost/graphql".to_string(),
        enable_apq: false,
        interceptors: Vec::new(),
        default_cache_policy: CachePolicy::CacheFirst,
    })
}

/// Transport replaying queued outcomes in order. An empty queue is a network failure.
#[derive(Default)]
pub struct MockCallFactory {
    outcomes: Mutex<VecDeque<Result<HttpResponse>>>,
    requests: Mutex<Vec<HttpRequest>>,
    delay: Mutex<Option<Duration>>,
}

impl MockCallFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue_response(
        &self,
        response: HttpResponse,
    ) {
        self.outcomes.lock().unwrap().push_back(Ok(response));
    }

    pub fn enqueue_json(
        &self,
        status: u16,
        body: Value,
    ) {
        self.enqueue_response(HttpResponse::new(status, body.to_string()));
    }

    pub fn enqueue_error(
        &self,
        error: GraphCacheError,
    ) {
        self.outcomes.lock().unwrap().push_back(Err(error));
    }

    /// Waits `delay` before answering each request.
    pub fn delay(
        &self,
        delay: Duration,
    ) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpCallFactory for MockCallFactory {
    async fn execute(
        &self,
        request: HttpRequest,
    ) -> Result<HttpResponse> {
        self.requests.lock().unwrap().push(request);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let outcome = self.outcomes.lock().unwrap().pop_front();
        outcome.unwrap_or_else(|| Err(GraphCacheError::Network("no response enqueued".to_string())))
    }
}
