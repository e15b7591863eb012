//! Remote action dispatch: a closed catalogue of store and match actions
//! addressed by `CATEGORY` / `TYPE` request attributes.
//!
//! A request carries a flat string attribute map plus a JSON body. The
//! dispatcher parses the two routing attributes, linearly scans its
//! registered actions for the first whose spec matches, and executes it.
//! Every outcome is folded into a [`Response`] with a single top-level `ok`
//! flag: success carries a `result` payload, failure carries a stable error
//! code and a human-readable message. The dispatcher itself never panics on
//! bad input; malformed requests become structured error responses like any
//! other failure.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{Value as Json, json};

use crate::error::{DispatchError, SemblanceError, SemblanceResult, error_code};
use crate::identity::Identity;
use crate::instance::Instance;
use crate::matcher::CancelToken;
use crate::store::{InstanceStore, WriteMode};

/// Attribute naming the action category.
pub const ATTR_CATEGORY: &str = "CATEGORY";
/// Attribute naming the action type within its category.
pub const ATTR_TYPE: &str = "TYPE";

/// Category half of an action address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionCategory {
    Store,
    Match,
}

impl fmt::Display for ActionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store => write!(f, "STORE"),
            Self::Match => write!(f, "MATCH"),
        }
    }
}

/// Type half of an action address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionType {
    Add,
    Remove,
    Get,
    Query,
    Matches,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => write!(f, "ADD"),
            Self::Remove => write!(f, "REMOVE"),
            Self::Get => write!(f, "GET"),
            Self::Query => write!(f, "QUERY"),
            Self::Matches => write!(f, "MATCHES"),
        }
    }
}

/// Fully-resolved action address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionSpec {
    pub category: ActionCategory,
    pub action_type: ActionType,
}

impl ActionSpec {
    pub const fn new(category: ActionCategory, action_type: ActionType) -> Self {
        Self {
            category,
            action_type,
        }
    }
}

impl fmt::Display for ActionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.action_type)
    }
}

/// An incoming action request: routing attributes plus a JSON body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub body: Json,
}

impl Request {
    /// Build a request addressed at `category`/`action_type`.
    pub fn new(category: ActionCategory, action_type: ActionType, body: Json) -> Self {
        let mut attributes = HashMap::new();
        attributes.insert(ATTR_CATEGORY.to_string(), category.to_string());
        attributes.insert(ATTR_TYPE.to_string(), action_type.to_string());
        Self { attributes, body }
    }

    /// Look up a required attribute.
    pub fn attribute(&self, name: &str) -> Result<&str, DispatchError> {
        self.attributes
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| DispatchError::MissingParameter {
                parameter: name.to_string(),
            })
    }

    /// Look up a required string field in the JSON body.
    pub fn body_str(&self, field: &str) -> Result<&str, DispatchError> {
        self.body
            .get(field)
            .and_then(Json::as_str)
            .ok_or_else(|| DispatchError::MissingParameter {
                parameter: field.to_string(),
            })
    }

    /// Look up a required object field in the JSON body.
    pub fn body_field(&self, field: &str) -> Result<&Json, DispatchError> {
        self.body
            .get(field)
            .ok_or_else(|| DispatchError::MissingParameter {
                parameter: field.to_string(),
            })
    }
}

/// Structured response with a single top-level outcome flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Json>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

/// Error half of a failed [`Response`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: String,
    pub message: String,
}

impl Response {
    pub fn success(result: Json) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(err: &SemblanceError) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(ResponseError {
                code: error_code(err).to_string(),
                message: err.to_string(),
            }),
        }
    }
}

/// Phases a request moves through inside the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Received,
    SpecParsed,
    CategoryMatched,
    TypeMatched,
    Executed,
    Responded,
}

impl fmt::Display for RequestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::SpecParsed => "spec-parsed",
            Self::CategoryMatched => "category-matched",
            Self::TypeMatched => "type-matched",
            Self::Executed => "executed",
            Self::Responded => "responded",
        };
        write!(f, "{name}")
    }
}

/// Per-request trace: the phases actually reached in order, the winning
/// action if one matched, and wall-clock time spent in the dispatcher.
#[derive(Debug, Clone, Default)]
pub struct DispatchTrace {
    phases: Vec<RequestPhase>,
    action: Option<ActionSpec>,
    elapsed: Duration,
}

impl DispatchTrace {
    fn enter(&mut self, phase: RequestPhase) {
        tracing::trace!(target: "semblance::dispatch", %phase, "request phase");
        self.phases.push(phase);
    }

    pub fn phases(&self) -> &[RequestPhase] {
        &self.phases
    }

    pub fn reached(&self, phase: RequestPhase) -> bool {
        self.phases.contains(&phase)
    }

    /// The action that won the scan, if the request got that far.
    pub fn action(&self) -> Option<ActionSpec> {
        self.action
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

/// A single dispatchable action.
pub trait Action: Send + Sync {
    /// The address this action answers to.
    fn spec(&self) -> ActionSpec;

    /// Execute against the request, producing the `result` payload.
    fn execute(&self, request: &Request, cancel: CancelToken) -> SemblanceResult<Json>;
}

/// Linear-scan dispatcher over a closed action catalogue.
pub struct ActionDispatcher {
    actions: Vec<Box<dyn Action>>,
}

impl ActionDispatcher {
    /// Build the standard catalogue over one store.
    pub fn new(store: Arc<InstanceStore>, write_mode: WriteMode) -> Self {
        let mut dispatcher = Self {
            actions: Vec::new(),
        };
        dispatcher.register(Box::new(AddAction {
            store: Arc::clone(&store),
            mode: write_mode,
        }));
        dispatcher.register(Box::new(RemoveAction {
            store: Arc::clone(&store),
        }));
        dispatcher.register(Box::new(GetAction {
            store: Arc::clone(&store),
        }));
        dispatcher.register(Box::new(QueryAction {
            store: Arc::clone(&store),
        }));
        dispatcher.register(Box::new(MatchesAction { store }));
        dispatcher
    }

    /// Register an action at the end of the scan order.
    pub fn register(&mut self, action: Box<dyn Action>) {
        self.actions.push(action);
    }

    /// Dispatch a request, always producing a response.
    pub fn dispatch(&self, request: &Request) -> Response {
        self.dispatch_traced(request).0
    }

    /// [`ActionDispatcher::dispatch`] with the per-request phase trace.
    pub fn dispatch_traced(&self, request: &Request) -> (Response, DispatchTrace) {
        let started = Instant::now();
        let mut trace = DispatchTrace::default();
        trace.enter(RequestPhase::Received);
        let response = match self.run(request, &mut trace) {
            Ok(result) => {
                trace.enter(RequestPhase::Executed);
                Response::success(result)
            }
            Err(err) => {
                tracing::debug!(
                    target: "semblance::dispatch",
                    code = error_code(&err),
                    %err,
                    "request failed"
                );
                Response::failure(&err)
            }
        };
        trace.enter(RequestPhase::Responded);
        trace.elapsed = started.elapsed();
        (response, trace)
    }

    fn run(&self, request: &Request, trace: &mut DispatchTrace) -> SemblanceResult<Json> {
        let category = request.attribute(ATTR_CATEGORY)?;
        let action_type = request.attribute(ATTR_TYPE)?;
        trace.enter(RequestPhase::SpecParsed);

        // Linear scan, first registered match wins; the attribute values are
        // echoed verbatim when nothing matches.
        let unrecognised = || DispatchError::UnrecognisedAction {
            category: category.to_string(),
            action_type: action_type.to_string(),
        };
        let mut in_category = self
            .actions
            .iter()
            .filter(|a| a.spec().category.to_string() == category)
            .peekable();
        if in_category.peek().is_none() {
            return Err(unrecognised().into());
        }
        trace.enter(RequestPhase::CategoryMatched);

        let action = in_category
            .find(|a| a.spec().action_type.to_string() == action_type)
            .ok_or_else(unrecognised)?;
        trace.enter(RequestPhase::TypeMatched);
        trace.action = Some(action.spec());
        tracing::debug!(
            target: "semblance::dispatch",
            action = %action.spec(),
            "dispatching"
        );

        action.execute(request, CancelToken::new())
    }
}

impl fmt::Debug for ActionDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let specs: Vec<String> = self.actions.iter().map(|a| a.spec().to_string()).collect();
        f.debug_struct("ActionDispatcher")
            .field("actions", &specs)
            .finish()
    }
}

fn parse_instance(body: &Json) -> Result<Instance, DispatchError> {
    serde_json::from_value(body.clone()).map_err(|err| DispatchError::BadBody {
        message: err.to_string(),
    })
}

struct AddAction {
    store: Arc<InstanceStore>,
    mode: WriteMode,
}

impl Action for AddAction {
    fn spec(&self) -> ActionSpec {
        ActionSpec::new(ActionCategory::Store, ActionType::Add)
    }

    fn execute(&self, request: &Request, _cancel: CancelToken) -> SemblanceResult<Json> {
        let instance = parse_instance(&request.body)?;
        let identity = instance.identity().clone();
        self.store.add(instance, self.mode)?;
        Ok(json!({ "identity": identity.as_str() }))
    }
}

struct RemoveAction {
    store: Arc<InstanceStore>,
}

impl Action for RemoveAction {
    fn spec(&self) -> ActionSpec {
        ActionSpec::new(ActionCategory::Store, ActionType::Remove)
    }

    fn execute(&self, request: &Request, _cancel: CancelToken) -> SemblanceResult<Json> {
        let identity = Identity::new(request.body_str("identity")?);
        let removed = self.store.remove(&identity)?;
        Ok(json!({ "identity": identity.as_str(), "removed": removed }))
    }
}

struct GetAction {
    store: Arc<InstanceStore>,
}

impl Action for GetAction {
    fn spec(&self) -> ActionSpec {
        ActionSpec::new(ActionCategory::Store, ActionType::Get)
    }

    fn execute(&self, request: &Request, _cancel: CancelToken) -> SemblanceResult<Json> {
        let identity = Identity::new(request.body_str("identity")?);
        let instance = self.store.get(&identity)?;
        let payload = serde_json::to_value(&*instance).map_err(|err| DispatchError::BadBody {
            message: err.to_string(),
        })?;
        Ok(payload)
    }
}

struct QueryAction {
    store: Arc<InstanceStore>,
}

impl Action for QueryAction {
    fn spec(&self) -> ActionSpec {
        ActionSpec::new(ActionCategory::Match, ActionType::Query)
    }

    fn execute(&self, request: &Request, cancel: CancelToken) -> SemblanceResult<Json> {
        let query = parse_instance(&request.body)?;
        let matches = self.store.query_cancellable(&query, cancel)?;
        let identities: Vec<&str> = matches.iter().map(Identity::as_str).collect();
        Ok(json!({ "matches": identities }))
    }
}

struct MatchesAction {
    store: Arc<InstanceStore>,
}

impl Action for MatchesAction {
    fn spec(&self) -> ActionSpec {
        ActionSpec::new(ActionCategory::Match, ActionType::Matches)
    }

    fn execute(&self, request: &Request, _cancel: CancelToken) -> SemblanceResult<Json> {
        let identity = Identity::new(request.body_str("identity")?);
        let query = parse_instance(request.body_field("query")?)?;
        let matched = self.store.matches(&identity, &query)?;
        Ok(json!({ "identity": identity.as_str(), "matches": matched }))
    }
}
