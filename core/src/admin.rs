//! Administration: server admins, users in `_users`, and per-database
//! security objects.
//!
//! These calls normally need admin credentials, so build the server with
//! `Server::with_admin` or an admin session token first. Empty logins and
//! roles are rejected before any request goes out.
//!
//! Security updates read the current object, apply an idempotent change to
//! one group and write the object back only when something changed.

use serde_json::{json, Value};
use tracing::debug;

use crate::client::from_value;
use crate::database::Database;
use crate::document::Document;
use crate::error::{CouchError, Result};
use crate::security::{SecurityDocument, SecurityGroup};
use crate::server::{encode_component, Server};
use crate::transport::Transport;
use crate::types::{AllDocsQuery, DocumentUpdate, NewUser};

/// Default database for user documents.
pub const USERS_DATABASE: &str = "_users";
pub const USER_ID_PREFIX: &str = "org.couchdb.user:";

#[derive(Debug, Clone, Copy)]
enum GroupKind {
    Admins,
    Members,
}

#[derive(Debug, Clone, Copy)]
enum Change<'a> {
    Add(&'a str, &'a [String]),
    Remove(&'a str, &'a [String]),
    AddRole(&'a str),
    RemoveRole(&'a str),
}

fn require(value: &str, what: &str) -> Result<()> {
    if value.is_empty() {
        return Err(CouchError::InvalidArgument(format!("{what} can't be empty")));
    }
    Ok(())
}

fn require_roles(roles: &[String]) -> Result<()> {
    roles.iter().try_for_each(|role| require(role, "Role"))
}

pub fn user_document_id(username: &str) -> String {
    format!("{USER_ID_PREFIX}{username}")
}

impl<T: Transport> Server<T> {
    fn admin_url(&self, username: &str) -> String {
        format!(
            "{}/_node/_local/_config/admins/{}",
            self.url(),
            encode_component(username)
        )
    }

    fn security_url(&self, database: &str) -> String {
        format!("{}/_security", self.database(database).url())
    }

    pub fn users_database(&self) -> Database<'_, T> {
        self.database(self.users_database_name())
    }

    /// Create a server administrator. CouchDB hashes the password itself.
    pub fn create_admin(&self, username: &str, password: &str) -> Result<()> {
        require(username, "Username")?;
        require(password, "Password")?;
        let options = self
            .options()
            .clone()
            .with_json(Value::String(password.to_string()));
        self.client().put(&self.admin_url(username), &[200], &options, None)?;
        debug!(username, "created server admin");
        Ok(())
    }

    pub fn delete_admin(&self, username: &str) -> Result<()> {
        require(username, "Username")?;
        self.client()
            .delete(&self.admin_url(username), &[200], self.options())?;
        Ok(())
    }

    /// Register a user in `_users`.
    pub fn create_user(&self, username: &str, password: &str, roles: &[String]) -> Result<DocumentUpdate> {
        require(username, "Username")?;
        require(password, "Password")?;
        require_roles(roles)?;

        let id = user_document_id(username);
        let user = NewUser {
            id: id.clone(),
            name: username,
            kind: "user",
            roles,
            password,
        };
        let body = serde_json::to_value(&user).map_err(|e| CouchError::Serialization(e.to_string()))?;
        let url = self.users_database().document_url(&id, None);
        let options = self.options().clone().with_json(body);

        let response = self.client().put(&url, &[201, 202], &options, None)?;
        from_value(response)
    }

    /// Fetch a user document. An unknown user is `NotFound`.
    pub fn get_user(&self, username: &str) -> Result<Document> {
        require(username, "Username")?;
        self.users_database()
            .fetch_document(&user_document_id(username))
    }

    pub fn delete_user(&self, username: &str) -> Result<()> {
        require(username, "Username")?;
        let users = self.users_database();
        let mut user = users.get_document_by_id(&user_document_id(username))?;
        users.delete_document(&mut user)
    }

    /// Every user document id (and, with `include_docs`, the documents).
    pub fn get_all_users(&self, include_docs: bool) -> Result<Vec<Document>> {
        let query = AllDocsQuery::include_docs(include_docs)
            .with_range(USER_ID_PREFIX, format!("{USER_ID_PREFIX}\u{fff0}"));
        self.users_database().all_documents(&query)
    }

    pub fn add_role_to_user(&self, username: &str, role: &str) -> Result<()> {
        require(role, "Role")?;
        let mut user = self.get_user(username)?;
        let mut roles = user_roles(&user);
        if roles.iter().any(|r| r == role) {
            return Ok(());
        }
        roles.push(role.to_string());
        user.set("roles", json!(roles))?;
        self.users_database().save_document(&mut user)
    }

    pub fn remove_role_from_user(&self, username: &str, role: &str) -> Result<()> {
        require(role, "Role")?;
        let mut user = self.get_user(username)?;
        let roles = user_roles(&user);
        if !roles.iter().any(|r| r == role) {
            return Ok(());
        }
        let remaining: Vec<&String> = roles.iter().filter(|r| *r != role).collect();
        user.set("roles", json!(remaining))?;
        self.users_database().save_document(&mut user)
    }

    /// Security object of `database`, with both groups always present.
    pub fn security_document(&self, database: &str) -> Result<SecurityDocument> {
        let body = self
            .client()
            .get(&self.security_url(database), &[200], self.options())?;
        if body.is_null() {
            return Ok(SecurityDocument::default());
        }
        from_value(body)
    }

    pub fn set_security_document(&self, database: &str, security: &SecurityDocument) -> Result<()> {
        let body = serde_json::to_value(security).map_err(|e| CouchError::Serialization(e.to_string()))?;
        let options = self.options().clone().with_json(body);
        self.client()
            .put(&self.security_url(database), &[200], &options, None)?;
        Ok(())
    }

    pub fn database_admins(&self, database: &str) -> Result<SecurityGroup> {
        Ok(self.security_document(database)?.admins)
    }

    pub fn database_members(&self, database: &str) -> Result<SecurityGroup> {
        Ok(self.security_document(database)?.members)
    }

    pub fn add_database_admin(&self, database: &str, username: &str, roles: &[String]) -> Result<()> {
        require(username, "Username")?;
        require_roles(roles)?;
        self.update_security(database, GroupKind::Admins, Change::Add(username, roles))
    }

    pub fn remove_database_admin(&self, database: &str, username: &str, roles: &[String]) -> Result<()> {
        require(username, "Username")?;
        require_roles(roles)?;
        self.update_security(database, GroupKind::Admins, Change::Remove(username, roles))
    }

    /// Grant `role` admin rights on `database` without naming a user.
    pub fn add_database_admin_role(&self, database: &str, role: &str) -> Result<()> {
        require(role, "Role")?;
        self.update_security(database, GroupKind::Admins, Change::AddRole(role))
    }

    pub fn remove_database_admin_role(&self, database: &str, role: &str) -> Result<()> {
        require(role, "Role")?;
        self.update_security(database, GroupKind::Admins, Change::RemoveRole(role))
    }

    pub fn database_admin_roles(&self, database: &str) -> Result<Vec<String>> {
        Ok(self.database_admins(database)?.roles)
    }

    pub fn add_database_member(&self, database: &str, username: &str, roles: &[String]) -> Result<()> {
        require(username, "Username")?;
        require_roles(roles)?;
        self.update_security(database, GroupKind::Members, Change::Add(username, roles))
    }

    pub fn remove_database_member(&self, database: &str, username: &str, roles: &[String]) -> Result<()> {
        require(username, "Username")?;
        require_roles(roles)?;
        self.update_security(database, GroupKind::Members, Change::Remove(username, roles))
    }

    /// Grant `role` member rights on `database` without naming a user.
    pub fn add_database_member_role(&self, database: &str, role: &str) -> Result<()> {
        require(role, "Role")?;
        self.update_security(database, GroupKind::Members, Change::AddRole(role))
    }

    pub fn remove_database_member_role(&self, database: &str, role: &str) -> Result<()> {
        require(role, "Role")?;
        self.update_security(database, GroupKind::Members, Change::RemoveRole(role))
    }

    pub fn database_member_roles(&self, database: &str) -> Result<Vec<String>> {
        Ok(self.database_members(database)?.roles)
    }

    fn update_security(&self, database: &str, kind: GroupKind, change: Change<'_>) -> Result<()> {
        let mut security = self.security_document(database)?;
        let group = match kind {
            GroupKind::Admins => &mut security.admins,
            GroupKind::Members => &mut security.members,
        };
        let changed = match change {
            Change::Add(username, roles) => group.add(username, roles),
            Change::Remove(username, roles) => group.remove(username, roles),
            Change::AddRole(role) => group.add_role(role),
            Change::RemoveRole(role) => group.remove_role(role),
        };
        if !changed {
            debug!(database, ?kind, ?change, "security object already up to date");
            return Ok(());
        }
        self.set_security_document(database, &security)
    }
}

fn user_roles(user: &Document) -> Vec<String> {
    user.get("roles")
        .and_then(Value::as_array)
        .map(|roles| {
            roles
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use crate::http::HttpMethod;
    use crate::options::ServerConfig;
    use crate::testing::StubTransport;

    fn server(transport: StubTransport) -> Server<StubTransport> {
        Server::new(Client::new(transport), ServerConfig::default()).with_admin("admin", "secret")
    }

    fn roles(list: &[&str]) -> Vec<String> {
        list.iter().map(|r| r.to_string()).collect()
    }

    fn body(request: &crate::http::HttpRequest) -> Value {
        serde_json::from_str(request.body.as_deref().unwrap()).unwrap()
    }

    #[test]
    fn empty_logins_are_rejected_before_io() {
        let s = server(StubTransport::new());
        assert!(matches!(s.create_admin("", "pw"), Err(CouchError::InvalidArgument(_))));
        assert!(matches!(s.create_admin("root", ""), Err(CouchError::InvalidArgument(_))));
        assert!(matches!(s.delete_admin(""), Err(CouchError::InvalidArgument(_))));
        assert!(matches!(s.create_user("", "pw", &[]), Err(CouchError::InvalidArgument(_))));
        assert!(matches!(s.delete_user(""), Err(CouchError::InvalidArgument(_))));
        assert!(matches!(
            s.add_database_admin("db", "", &[]),
            Err(CouchError::InvalidArgument(_))
        ));
        assert!(matches!(
            s.add_database_member("db", "adam", &roles(&[""])),
            Err(CouchError::InvalidArgument(_))
        ));
        assert!(matches!(s.add_role_to_user("adam", ""), Err(CouchError::InvalidArgument(_))));
        assert!(s.client().transport().requests().is_empty());
    }

    #[test]
    fn create_admin_puts_password_as_json_string() {
        let s = server(StubTransport::new().with_json(200, json!("")));
        s.create_admin("root", "b0110ck5").unwrap();
        let requests = s.client().transport().requests();
        assert_eq!(requests[0].method, HttpMethod::Put);
        assert_eq!(
            requests[0].url,
            "http://127.0.0.1:5984/_node/_local/_config/admins/root"
        );
        assert_eq!(body(&requests[0]), json!("b0110ck5"));
        assert_eq!(requests[0].header("authorization"), Some("Basic YWRtaW46c2VjcmV0"));
    }

    #[test]
    fn create_user_writes_user_document() {
        let s = server(StubTransport::new().with_json(
            201,
            json!({"ok": true, "id": "org.couchdb.user:adam", "rev": "1-u"}),
        ));
        let update = s.create_user("adam", "test", &roles(&["reader"])).unwrap();
        assert_eq!(update.rev, "1-u");

        let requests = s.client().transport().requests();
        assert_eq!(
            requests[0].url,
            "http://127.0.0.1:5984/_users/org.couchdb.user%3Aadam"
        );
        assert_eq!(
            body(&requests[0]),
            json!({
                "_id": "org.couchdb.user:adam", "name": "adam", "type": "user",
                "roles": ["reader"], "password": "test"
            })
        );
    }

    #[test]
    fn delete_user_fetches_then_deletes_with_rev() {
        let s = server(
            StubTransport::new()
                .with_json(200, json!({"_id": "org.couchdb.user:adam", "_rev": "2-r", "name": "adam"}))
                .with_json(200, json!({"ok": true, "id": "org.couchdb.user:adam", "rev": "3-r"})),
        );
        s.delete_user("adam").unwrap();
        let requests = s.client().transport().requests();
        assert_eq!(requests[1].method, HttpMethod::Delete);
        assert_eq!(
            requests[1].url,
            "http://127.0.0.1:5984/_users/org.couchdb.user%3Aadam?rev=2-r"
        );
    }

    #[test]
    fn deleting_an_unknown_user_fails_precondition() {
        let s = server(StubTransport::new().with_json(404, json!({"error": "not_found"})));
        let err = s.delete_user("ghost").unwrap_err();
        assert!(matches!(err, CouchError::PreconditionFailed(_)));
        assert_eq!(s.client().transport().requests().len(), 1);
    }

    #[test]
    fn user_listing_is_range_limited() {
        let s = server(StubTransport::new().with_json(200, json!({"rows": []})));
        assert!(s.get_all_users(true).unwrap().is_empty());
        let requests = s.client().transport().requests();
        assert_eq!(
            requests[0].url,
            "http://127.0.0.1:5984/_users/_all_docs?include_docs=true\
             &startkey=%22org.couchdb.user%3A%22&endkey=%22org.couchdb.user%3A%EF%BF%B0%22"
        );
    }

    #[test]
    fn add_role_only_writes_when_missing() {
        let user = json!({"_id": "org.couchdb.user:adam", "_rev": "1-a", "name": "adam", "roles": ["reader"]});
        let s = server(
            StubTransport::new()
                .with_json(200, user.clone())
                .with_json(200, user)
                .with_json(201, json!({"ok": true, "id": "org.couchdb.user:adam", "rev": "2-a"})),
        );
        s.add_role_to_user("adam", "reader").unwrap();
        assert_eq!(s.client().transport().requests().len(), 1);

        s.add_role_to_user("adam", "editor").unwrap();
        let requests = s.client().transport().requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[2].method, HttpMethod::Put);
        assert_eq!(body(&requests[2])["roles"], json!(["reader", "editor"]));
    }

    #[test]
    fn remove_role_writes_remaining_roles() {
        let user = json!({"_id": "org.couchdb.user:adam", "_rev": "1-a", "name": "adam", "roles": ["reader", "editor"]});
        let s = server(
            StubTransport::new()
                .with_json(200, user)
                .with_json(201, json!({"ok": true, "id": "org.couchdb.user:adam", "rev": "2-a"})),
        );
        s.remove_role_from_user("adam", "reader").unwrap();
        let requests = s.client().transport().requests();
        assert_eq!(body(&requests[1])["roles"], json!(["editor"]));
    }

    #[test]
    fn empty_security_object_gets_default_groups() {
        let s = server(StubTransport::new().with_json(200, json!({})));
        let sec = s.security_document("test").unwrap();
        assert!(sec.admins.names.is_empty());
        assert!(sec.members.roles.is_empty());
        let requests = s.client().transport().requests();
        assert_eq!(requests[0].url, "http://127.0.0.1:5984/test/_security");
    }

    #[test]
    fn add_member_reads_modifies_and_writes() {
        let s = server(
            StubTransport::new()
                .with_json(200, json!({"admins": {"names": ["root"], "roles": []}}))
                .with_json(200, json!({"ok": true})),
        );
        s.add_database_member("test", "adam", &roles(&["reader"])).unwrap();
        let requests = s.client().transport().requests();
        assert_eq!(requests[1].method, HttpMethod::Put);
        assert_eq!(
            body(&requests[1]),
            json!({
                "admins": {"names": ["root"], "roles": []},
                "members": {"names": ["adam"], "roles": ["reader"]}
            })
        );
    }

    #[test]
    fn repeated_add_skips_the_write() {
        let s = server(StubTransport::new().with_json(
            200,
            json!({"admins": {"names": ["adam"], "roles": ["ops"]}}),
        ));
        s.add_database_admin("test", "adam", &roles(&["ops"])).unwrap();
        assert_eq!(s.client().transport().requests().len(), 1);
    }

    #[test]
    fn remove_admin_drops_name_and_roles() {
        let s = server(
            StubTransport::new()
                .with_json(200, json!({"admins": {"names": ["eve", "adam"], "roles": ["ops", "dba"]}}))
                .with_json(200, json!({"ok": true})),
        );
        s.remove_database_admin("test", "adam", &roles(&["dba"])).unwrap();
        let requests = s.client().transport().requests();
        assert_eq!(
            body(&requests[1])["admins"],
            json!({"names": ["eve"], "roles": ["ops"]})
        );
    }

    #[test]
    fn role_grants_touch_only_roles() {
        let s = server(
            StubTransport::new()
                .with_json(200, json!({"admins": {"names": ["root"], "roles": []}}))
                .with_json(200, json!({"ok": true}))
                .with_json(200, json!({"members": {"names": ["adam"], "roles": ["reader", "guest"]}}))
                .with_json(200, json!({"ok": true})),
        );
        s.add_database_admin_role("test", "ops").unwrap();
        s.remove_database_member_role("test", "guest").unwrap();

        let requests = s.client().transport().requests();
        assert_eq!(requests.len(), 4);
        assert_eq!(
            body(&requests[1])["admins"],
            json!({"names": ["root"], "roles": ["ops"]})
        );
        assert_eq!(
            body(&requests[3])["members"],
            json!({"names": ["adam"], "roles": ["reader"]})
        );
    }

    #[test]
    fn unchanged_roles_skip_the_write() {
        let s = server(
            StubTransport::new()
                .with_json(200, json!({"members": {"names": [], "roles": ["reader"]}}))
                .with_json(200, json!({})),
        );
        s.add_database_member_role("test", "reader").unwrap();
        s.remove_database_admin_role("test", "ops").unwrap();
        let requests = s.client().transport().requests();
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.method == HttpMethod::Get));
    }

    #[test]
    fn role_lists_come_from_the_security_object() {
        let s = server(
            StubTransport::new()
                .with_json(200, json!({"admins": {"roles": ["ops"]}, "members": {"roles": ["reader"]}}))
                .with_json(200, json!({"admins": {"roles": ["ops"]}, "members": {"roles": ["reader"]}})),
        );
        assert_eq!(s.database_admin_roles("test").unwrap(), vec!["ops"]);
        assert_eq!(s.database_member_roles("test").unwrap(), vec!["reader"]);
    }

    #[test]
    fn empty_role_names_are_rejected_before_io() {
        let s = server(StubTransport::new());
        for result in [
            s.add_database_admin_role("test", ""),
            s.remove_database_admin_role("test", ""),
            s.add_database_member_role("test", ""),
            s.remove_database_member_role("test", ""),
        ] {
            assert!(matches!(result, Err(CouchError::InvalidArgument(ref m)) if m == "Role can't be empty"));
        }
        assert!(s.client().transport().requests().is_empty());
    }

    #[test]
    fn users_database_can_be_renamed() {
        let s = server(
            StubTransport::new()
                .with_json(200, json!({"_id": "org.couchdb.user:adam", "_rev": "1-a", "name": "adam"})),
        )
        .with_users_database("people");
        assert_eq!(s.users_database_name(), "people");
        s.get_user("adam").unwrap();
        let requests = s.client().transport().requests();
        assert_eq!(
            requests[0].url,
            "http://127.0.0.1:5984/people/org.couchdb.user%3Aadam"
        );
    }
}
