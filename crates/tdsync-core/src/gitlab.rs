//! GitLab REST v4 client: item metadata, issue listing, weights and iterations.

use crate::error::{Result, SyncError};
use crate::http::{api_root, client, decode, encode_path, ensure_success};
use crate::reference::{ItemKind, ItemReference, MilestoneScope};
use crate::sync::Tracker;
use crate::types::{Issue, ItemMetadata};
use reqwest::blocking::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::cell::RefCell;
use std::collections::HashMap;

const SERVICE: &str = "GitLab";

/// Maximum page size GitLab allows on list endpoints.
pub const PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Deserialize)]
struct Milestone {
    id: u64,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    web_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Iteration {
    id: u64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    start_date: Option<String>,
    #[serde(default)]
    due_date: Option<String>,
    #[serde(default)]
    web_url: Option<String>,
}

impl Iteration {
    /// Automatic cadences leave `title` empty; fall back to the date range.
    fn display_title(&self) -> String {
        match (&self.title, &self.start_date, &self.due_date) {
            (Some(title), _, _) if !title.is_empty() => title.clone(),
            (_, Some(start), Some(due)) => format!("{start} - {due}"),
            _ => format!("Iteration {}", self.id),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Named {
    #[serde(alias = "name")]
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    web_url: Option<String>,
}

/// The `weight` key of an issue payload. GitLab omits it when the tier or the
/// token cannot see weights, which is different from an explicit `null`.
#[derive(Debug, Deserialize)]
struct WeightField {
    #[serde(default, deserialize_with = "present")]
    weight: Option<Option<u32>>,
}

fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Option<u32>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<u32>::deserialize(deserializer).map(Some)
}

impl WeightField {
    fn reported(self, reference: &ItemReference) -> Result<Option<u32>> {
        self.weight.ok_or_else(|| {
            SyncError::Validation(format!(
                "issue {reference} has no weight field in the API response; \
                 check that the token can read it and the GitLab tier supports weights"
            ))
        })
    }
}

#[derive(Debug, serde::Serialize)]
struct WeightUpdate {
    weight: u32,
}

#[derive(Debug, serde::Serialize)]
struct Note {
    body: String,
}

// ---------------------------------------------------------------------------
// GitLabClient
// ---------------------------------------------------------------------------

pub struct GitLabClient {
    http: Client,
    api: String,
    /// Scheme and host that references must carry to be served by this client.
    origin: String,
    token: String,
    milestones: RefCell<HashMap<String, Milestone>>,
}

impl GitLabClient {
    /// `base_url` is the instance root, e.g. `https://gitlab.com`.
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: client()?,
            api: api_root(base_url, "/api/v4"),
            origin: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
            milestones: RefCell::new(HashMap::new()),
        })
    }

    /// Refuse references that point at another GitLab instance.
    fn ensure_same_instance(&self, reference: &ItemReference) -> Result<()> {
        if reference.origin.eq_ignore_ascii_case(&self.origin) {
            return Ok(());
        }
        Err(SyncError::invalid_reference(
            &reference.web_url(),
            format!(
                "{} is not the configured GitLab instance {}",
                reference.origin, self.origin
            ),
        ))
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.http
            .get(format!("{}{path}", self.api))
            .bearer_auth(&self.token)
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<T> {
        let resp = self.get(path).send()?;
        decode(ensure_success(resp, SERVICE, what)?)
    }

    /// Fetch every page of a list endpoint, following `x-next-page`.
    fn paginate<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        what: &str,
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut page = "1".to_string();
        loop {
            let resp = self
                .get(path)
                .query(query)
                .query(&[("per_page", PAGE_SIZE.to_string()), ("page", page)])
                .send()?;
            let resp = ensure_success(resp, SERVICE, what)?;
            let next = resp
                .headers()
                .get("x-next-page")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string);
            let mut batch: Vec<T> = decode(resp)?;
            items.append(&mut batch);
            match next {
                Some(n) => page = n,
                None => break,
            }
        }
        Ok(items)
    }

    /// Look up a milestone by iid. Results are kept so that metadata and issue
    /// listing for the same milestone share one request.
    fn milestone(&self, reference: &ItemReference, scope: &MilestoneScope, iid: u64) -> Result<Milestone> {
        let key = reference.to_string();
        if let Some(cached) = self.milestones.borrow().get(&key) {
            return Ok(cached.clone());
        }
        let path = format!("{}/milestones", scope_root(scope));
        let resp = self
            .get(&path)
            .query(&[("iids[]", iid.to_string())])
            .send()?;
        let milestones: Vec<Milestone> =
            decode(ensure_success(resp, SERVICE, &reference.to_string())?)?;
        let milestone = milestones
            .into_iter()
            .next()
            .ok_or_else(|| SyncError::NotFound {
                what: key.clone(),
                message: "no milestone with that id".to_string(),
            })?;
        self.milestones.borrow_mut().insert(key, milestone.clone());
        Ok(milestone)
    }

    fn iteration(&self, reference: &ItemReference, group: &str, id: u64) -> Result<Iteration> {
        let path = format!("/groups/{}/iterations", encode_path(group));
        let iterations: Vec<Iteration> =
            self.paginate(&path, &[("include_ancestors", "true".to_string())], &reference.to_string())?;
        iterations
            .into_iter()
            .find(|it| it.id == id)
            .ok_or_else(|| SyncError::NotFound {
                what: reference.to_string(),
                message: format!("iteration {id} is not visible in group '{group}'"),
            })
    }
}

fn scope_root(scope: &MilestoneScope) -> String {
    match scope {
        MilestoneScope::Group(group) => format!("/groups/{}", encode_path(group)),
        MilestoneScope::Project(project) => format!("/projects/{}", encode_path(project)),
    }
}

fn issue_path(project: &str, iid: u64) -> String {
    format!("/projects/{}/issues/{iid}", encode_path(project))
}

impl Tracker for GitLabClient {
    fn fetch_metadata(&self, reference: &ItemReference) -> Result<ItemMetadata> {
        self.ensure_same_instance(reference)?;
        let what = reference.to_string();
        let named: Named = match &reference.kind {
            ItemKind::Issue { .. } => {
                let issue = self.fetch_issue(reference)?;
                return Ok(ItemMetadata {
                    title: issue.title,
                    description: issue.description,
                    web_url: issue.web_url,
                });
            }
            ItemKind::Milestone { scope, iid } => {
                let m = self.milestone(reference, scope, *iid)?;
                Named {
                    title: m.title,
                    description: m.description,
                    web_url: m.web_url,
                }
            }
            ItemKind::Iteration { group, id, .. } => {
                let it = self.iteration(reference, group, *id)?;
                Named {
                    title: it.display_title(),
                    description: it.description,
                    web_url: it.web_url,
                }
            }
            ItemKind::Epic { group, iid } => {
                self.get_json(&format!("/groups/{}/epics/{iid}", encode_path(group)), &what)?
            }
            ItemKind::Project { project } => {
                self.get_json(&format!("/projects/{}", encode_path(project)), &what)?
            }
        };
        Ok(ItemMetadata {
            title: named.title,
            description: named.description,
            web_url: named.web_url.unwrap_or_else(|| reference.web_url()),
        })
    }

    fn fetch_issue(&self, reference: &ItemReference) -> Result<Issue> {
        self.ensure_same_instance(reference)?;
        match &reference.kind {
            ItemKind::Issue { project, iid } => {
                self.get_json(&issue_path(project, *iid), &reference.to_string())
            }
            _ => Err(SyncError::UnsupportedKind {
                operation: "fetching an issue",
                kind: reference.kind_name(),
            }),
        }
    }

    fn list_issues(&self, reference: &ItemReference) -> Result<Vec<Issue>> {
        self.ensure_same_instance(reference)?;
        let what = reference.to_string();
        match &reference.kind {
            ItemKind::Issue { .. } => Ok(vec![self.fetch_issue(reference)?]),
            ItemKind::Milestone { scope, iid } => {
                let milestone = self.milestone(reference, scope, *iid)?;
                let path = format!("{}/milestones/{}/issues", scope_root(scope), milestone.id);
                self.paginate(&path, &[], &what)
            }
            ItemKind::Iteration { group, id, .. } => {
                let path = format!("/groups/{}/issues", encode_path(group));
                self.paginate(&path, &[("iteration_id", id.to_string())], &what)
            }
            ItemKind::Epic { group, iid } => {
                let path = format!("/groups/{}/epics/{iid}/issues", encode_path(group));
                self.paginate(&path, &[], &what)
            }
            ItemKind::Project { project } => {
                let path = format!("/projects/{}/issues", encode_path(project));
                self.paginate(&path, &[], &what)
            }
        }
    }

    fn current_estimate(&self, reference: &ItemReference) -> Result<Option<u32>> {
        self.ensure_same_instance(reference)?;
        let ItemKind::Issue { project, iid } = &reference.kind else {
            return Err(SyncError::UnsupportedKind {
                operation: "reading an estimate",
                kind: reference.kind_name(),
            });
        };
        let field: WeightField =
            self.get_json(&issue_path(project, *iid), &reference.to_string())?;
        field.reported(reference)
    }

    fn set_estimate(&self, reference: &ItemReference, points: u32) -> Result<()> {
        self.ensure_same_instance(reference)?;
        let ItemKind::Issue { project, iid } = &reference.kind else {
            return Err(SyncError::UnsupportedKind {
                operation: "setting an estimate",
                kind: reference.kind_name(),
            });
        };
        let resp = self
            .http
            .put(format!("{}{}", self.api, issue_path(project, *iid)))
            .bearer_auth(&self.token)
            .json(&WeightUpdate { weight: points })
            .send()?;
        // GitLab answers 200 and drops the field when weights are unavailable.
        let field: WeightField = decode(ensure_success(resp, SERVICE, &reference.to_string())?)?;
        field.reported(reference)?;
        Ok(())
    }

    fn set_iteration(&self, reference: &ItemReference, iteration: &ItemReference) -> Result<()> {
        self.ensure_same_instance(reference)?;
        self.ensure_same_instance(iteration)?;
        let ItemKind::Iteration { id, .. } = &iteration.kind else {
            return Err(SyncError::UnsupportedKind {
                operation: "using as an iteration",
                kind: iteration.kind_name(),
            });
        };
        let ItemKind::Issue { project, iid } = &reference.kind else {
            return Err(SyncError::UnsupportedKind {
                operation: "assigning an iteration",
                kind: reference.kind_name(),
            });
        };
        // The issues API has no iteration field, so go through a quick action.
        let resp = self
            .http
            .post(format!("{}{}/notes", self.api, issue_path(project, *iid)))
            .bearer_auth(&self.token)
            .json(&Note {
                body: format!("/iteration *iteration:{id}"),
            })
            .send()?;
        ensure_success(resp, SERVICE, &reference.to_string())?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::resolve;
    use mockito::{Matcher, Server, ServerGuard};

    /// Resolve a web path on the mock instance.
    fn at(server: &ServerGuard, path: &str) -> ItemReference {
        resolve(&format!("{}{path}", server.url())).unwrap()
    }

    fn issue_json(iid: u64, weight: Option<u32>) -> String {
        serde_json::json!({
            "id": 1000 + iid,
            "iid": iid,
            "title": format!("Issue {iid}"),
            "description": "details",
            "state": "opened",
            "weight": weight,
            "labels": ["backend"],
            "web_url": format!("https://gitlab.com/acme/app/-/issues/{iid}"),
        })
        .to_string()
    }

    #[test]
    fn fetches_issue_metadata_with_bearer_token() {
        let mut server = Server::new();
        let m = server
            .mock("GET", "/api/v4/projects/acme%2Fapp/issues/7")
            .match_header("authorization", "Bearer glpat-secret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(issue_json(7, None))
            .create();

        let client = GitLabClient::new(&server.url(), "glpat-secret").unwrap();
        let r = at(&server, "/acme/app/-/issues/7");
        let meta = client.fetch_metadata(&r).unwrap();

        m.assert();
        assert_eq!(meta.title, "Issue 7");
        assert_eq!(meta.description.as_deref(), Some("details"));
    }

    #[test]
    fn fetches_project_metadata_by_name() {
        let mut server = Server::new();
        server
            .mock("GET", "/api/v4/projects/acme%2Fapp")
            .with_status(200)
            .with_body(r#"{"id":5,"name":"app","description":null,"web_url":"https://gitlab.com/acme/app"}"#)
            .create();

        let client = GitLabClient::new(&server.url(), "t").unwrap();
        let r = at(&server, "/acme/app");
        let meta = client.fetch_metadata(&r).unwrap();
        assert_eq!(meta.title, "app");
        assert_eq!(meta.description, None);
    }

    #[test]
    fn maps_401_to_auth_error() {
        let mut server = Server::new();
        server
            .mock("GET", "/api/v4/projects/acme%2Fapp/issues/7")
            .with_status(401)
            .with_body(r#"{"message":"401 Unauthorized"}"#)
            .create();

        let client = GitLabClient::new(&server.url(), "bad").unwrap();
        let r = at(&server, "/acme/app/-/issues/7");
        let err = client.fetch_metadata(&r).unwrap_err();
        assert!(
            matches!(err, SyncError::Auth { status: 401, ref message, .. } if message == "401 Unauthorized")
        );
    }

    #[test]
    fn maps_404_to_not_found() {
        let mut server = Server::new();
        server
            .mock("GET", "/api/v4/groups/acme/epics/99")
            .with_status(404)
            .with_body(r#"{"message":"404 Not found"}"#)
            .create();

        let client = GitLabClient::new(&server.url(), "t").unwrap();
        let r = at(&server, "/groups/acme/-/epics/99");
        let err = client.fetch_metadata(&r).unwrap_err();
        assert!(matches!(err, SyncError::NotFound { ref what, .. } if what == "acme&99"));
    }

    #[test]
    fn lists_milestone_issues_across_pages() {
        let mut server = Server::new();
        server
            .mock("GET", "/api/v4/groups/acme/milestones")
            .match_query(Matcher::UrlEncoded("iids[]".into(), "3".into()))
            .with_status(200)
            .with_body(r#"[{"id":811,"iid":3,"title":"Sprint 3"}]"#)
            .create();
        let page1 = server
            .mock("GET", "/api/v4/groups/acme/milestones/811/issues")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("page".into(), "1".into()),
                Matcher::UrlEncoded("per_page".into(), "100".into()),
            ]))
            .with_status(200)
            .with_header("x-next-page", "2")
            .with_body(format!("[{}]", issue_json(1, None)))
            .create();
        let page2 = server
            .mock("GET", "/api/v4/groups/acme/milestones/811/issues")
            .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
            .with_status(200)
            .with_header("x-next-page", "")
            .with_body(format!("[{}]", issue_json(2, Some(3))))
            .create();

        let client = GitLabClient::new(&server.url(), "t").unwrap();
        let r = at(&server, "/groups/acme/-/milestones/3");
        let issues = client.list_issues(&r).unwrap();

        page1.assert();
        page2.assert();
        assert_eq!(issues.iter().map(|i| i.iid).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(issues[1].weight, Some(3));
    }

    #[test]
    fn lists_iteration_issues_by_iteration_id() {
        let mut server = Server::new();
        let m = server
            .mock("GET", "/api/v4/groups/acme/issues")
            .match_query(Matcher::UrlEncoded("iteration_id".into(), "3456".into()))
            .with_status(200)
            .with_body(format!("[{}]", issue_json(4, None)))
            .create();

        let client = GitLabClient::new(&server.url(), "t").unwrap();
        let r = at(&server, "/groups/acme/-/cadences/12/iterations/3456");
        let issues = client.list_issues(&r).unwrap();
        m.assert();
        assert_eq!(issues.len(), 1);
    }

    #[test]
    fn iteration_metadata_falls_back_to_dates() {
        let mut server = Server::new();
        server
            .mock("GET", "/api/v4/groups/acme/iterations")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                r#"[{"id":1,"title":"Other"},
                    {"id":3456,"title":null,"start_date":"2026-10-05","due_date":"2026-10-18"}]"#,
            )
            .create();

        let client = GitLabClient::new(&server.url(), "t").unwrap();
        let r = at(&server, "/groups/acme/-/cadences/12/iterations/3456");
        let meta = client.fetch_metadata(&r).unwrap();
        assert_eq!(meta.title, "2026-10-05 - 2026-10-18");
        assert_eq!(meta.web_url, r.web_url());
    }

    #[test]
    fn sets_weight_on_issue() {
        let mut server = Server::new();
        let m = server
            .mock("PUT", "/api/v4/projects/acme%2Fapp/issues/1")
            .match_body(Matcher::Json(serde_json::json!({"weight": 5})))
            .with_status(200)
            .with_body(issue_json(1, Some(5)))
            .create();

        let client = GitLabClient::new(&server.url(), "t").unwrap();
        let r = at(&server, "/acme/app/-/issues/1");
        client.set_estimate(&r, 5).unwrap();
        m.assert();
    }

    #[test]
    fn set_estimate_rejects_milestones_without_a_request() {
        let server = Server::new();
        let client = GitLabClient::new(&server.url(), "t").unwrap();
        let r = at(&server, "/groups/acme/-/milestones/3");
        let err = client.set_estimate(&r, 5).unwrap_err();
        assert!(matches!(
            err,
            SyncError::UnsupportedKind {
                kind: "milestone",
                ..
            }
        ));
    }

    #[test]
    fn assigns_iteration_through_quick_action_note() {
        let mut server = Server::new();
        let m = server
            .mock("POST", "/api/v4/projects/acme%2Fapp/issues/1/notes")
            .match_body(Matcher::Json(
                serde_json::json!({"body": "/iteration *iteration:3456"}),
            ))
            .with_status(201)
            .with_body(r#"{"id":1}"#)
            .create();

        let client = GitLabClient::new(&server.url(), "t").unwrap();
        let issue = at(&server, "/acme/app/-/issues/1");
        let iteration = at(&server, "/groups/acme/-/cadences/12/iterations/3456");
        client.set_iteration(&issue, &iteration).unwrap();
        m.assert();
    }

    #[test]
    fn set_iteration_requires_an_iteration_reference() {
        let server = Server::new();
        let client = GitLabClient::new(&server.url(), "t").unwrap();
        let issue = at(&server, "/acme/app/-/issues/1");
        let epic = at(&server, "/groups/acme/-/epics/2");
        assert!(matches!(
            client.set_iteration(&issue, &epic),
            Err(SyncError::UnsupportedKind { kind: "epic", .. })
        ));
    }

    #[test]
    fn rejects_references_to_another_instance() {
        let mut server = Server::new();
        let any = server.mock("PUT", Matcher::Any).expect(0).create();
        let client = GitLabClient::new(&server.url(), "t").unwrap();

        let foreign = resolve("https://gitlab.other-company.example/acme/app/-/issues/1").unwrap();
        let err = client.set_estimate(&foreign, 5).unwrap_err();
        assert!(matches!(err, SyncError::InvalidReference { .. }));
        assert!(err.to_string().contains("not the configured GitLab instance"));

        let iteration = resolve("https://gitlab.com/groups/acme/-/cadences/12/iterations/3456").unwrap();
        assert!(matches!(
            client.set_iteration(&at(&server, "/acme/app/-/issues/1"), &iteration),
            Err(SyncError::InvalidReference { .. })
        ));
        any.assert();
    }

    #[test]
    fn accepts_base_url_with_trailing_slash() {
        let mut server = Server::new();
        server
            .mock("GET", "/api/v4/projects/acme%2Fapp/issues/2")
            .with_status(200)
            .with_body(issue_json(2, Some(8)))
            .create();
        let client = GitLabClient::new(&format!("{}/", server.url()), "t").unwrap();
        assert_eq!(
            client.current_estimate(&at(&server, "/acme/app/-/issues/2")).unwrap(),
            Some(8)
        );
    }

    #[test]
    fn current_estimate_distinguishes_null_from_missing_weight() {
        let mut server = Server::new();
        server
            .mock("GET", "/api/v4/projects/acme%2Fapp/issues/1")
            .with_status(200)
            .with_body(issue_json(1, None))
            .create();
        server
            .mock("GET", "/api/v4/projects/acme%2Fapp/issues/2")
            .with_status(200)
            .with_body(r#"{"id":1002,"iid":2,"title":"Issue 2","state":"opened","web_url":"x"}"#)
            .create();

        let client = GitLabClient::new(&server.url(), "t").unwrap();
        assert_eq!(client.current_estimate(&at(&server, "/acme/app/-/issues/1")).unwrap(), None);
        let err = client
            .current_estimate(&at(&server, "/acme/app/-/issues/2"))
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(ref m) if m.contains("no weight field")));
    }

    #[test]
    fn set_estimate_fails_when_gitlab_drops_the_weight() {
        let mut server = Server::new();
        let m = server
            .mock("PUT", "/api/v4/projects/acme%2Fapp/issues/1")
            .with_status(200)
            .with_body(r#"{"id":1001,"iid":1,"title":"Issue 1","state":"opened","web_url":"x"}"#)
            .create();

        let client = GitLabClient::new(&server.url(), "t").unwrap();
        let err = client
            .set_estimate(&at(&server, "/acme/app/-/issues/1"), 5)
            .unwrap_err();
        m.assert();
        assert!(err.to_string().contains("no weight field"));
    }

    #[test]
    fn milestone_is_looked_up_once_for_metadata_and_issues() {
        let mut server = Server::new();
        let lookup = server
            .mock("GET", "/api/v4/projects/acme%2Fapp/milestones")
            .match_query(Matcher::UrlEncoded("iids[]".into(), "4".into()))
            .with_status(200)
            .with_body(r#"[{"id":900,"iid":4,"title":"Release 4"}]"#)
            .expect(1)
            .create();
        server
            .mock("GET", "/api/v4/projects/acme%2Fapp/milestones/900/issues")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(format!("[{}]", issue_json(1, None)))
            .create();

        let client = GitLabClient::new(&server.url(), "t").unwrap();
        let r = at(&server, "/acme/app/-/milestones/4");
        assert_eq!(client.fetch_metadata(&r).unwrap().title, "Release 4");
        assert_eq!(client.list_issues(&r).unwrap().len(), 1);
        lookup.assert();
    }
}
