mod common;

use reqwest::StatusCode;
use serde_json::{json, Value};

use common::{start_api, unique_suffix, ApiFixture, TEST_PORT_END, TEST_PORT_START};

struct Fleet {
    admin: String,
    template_id: i64,
    node_id: i64,
}

/// A template exposing two container ports with minimums, and a node of
/// 4 cpu / 40 disk / 8192 memory.
async fn fleet(api: &ApiFixture) -> Fleet {
    let admin = api.admin_token().await;
    let template = api
        .create_template(
            &admin,
            json!({
                "name": format!("valheim-{}", unique_suffix()),
                "image": "lloesche/valheim-server:latest",
                "default_env": { "SERVER_PUBLIC": "false", "WORLD_NAME": "Dedicated" },
                "exposed_port": [2456, 2457],
                "resource_min_cpu": 1,
                "resource_min_disk": 5,
                "resource_min_mem": 1024
            }),
        )
        .await;
    let node = api.create_node(&admin, 4, 40, 8192).await;

    Fleet {
        admin,
        template_id: template["id"].as_i64().unwrap(),
        node_id: node["id"].as_i64().unwrap(),
    }
}

fn server_body(fleet: &Fleet, name: &str, cpu: i32, disk: i32, memory: i32) -> Value {
    json!({
        "name": name,
        "template_id": fleet.template_id,
        "node_id": fleet.node_id,
        "cpu": cpu,
        "disk": disk,
        "memory": memory
    })
}

#[tokio::test]
async fn test_create_server_allocates_ports_and_merges_env() {
    let api = start_api().await;
    let fleet = fleet(&api).await;

    let mut body = server_body(&fleet, "vikings", 2, 10, 2048);
    body["env"] = json!({ "WORLD_NAME": "Midgard" });

    let resp = api.post_server(&fleet.admin, body).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let server: Value = resp.json().await.unwrap();

    assert_eq!(server["container_name"], "sm-vikings");
    assert_eq!(server["env"]["SERVER_PUBLIC"], "false");
    assert_eq!(server["env"]["WORLD_NAME"], "Midgard");
    assert_eq!(
        server["port"],
        json!({ "2456": TEST_PORT_START, "2457": TEST_PORT_START + 1 })
    );

    let resp = api
        .client
        .get(api.url("/v1/servers/ports/available?count=2"))
        .bearer_auth(&fleet.admin)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let ports: Value = resp.json().await.unwrap();
    assert_eq!(
        ports["items"],
        json!([TEST_PORT_START + 2, TEST_PORT_START + 3])
    );
}

#[tokio::test]
async fn test_capacity_is_enforced_per_node() {
    let api = start_api().await;
    let fleet = fleet(&api).await;

    let resp = api
        .post_server(&fleet.admin, server_body(&fleet, "first", 3, 20, 4096))
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = api
        .post_server(&fleet.admin, server_body(&fleet, "second", 2, 10, 2048))
        .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let problem: Value = resp.json().await.unwrap();
    assert_eq!(problem["code"], "capacity_exceeded");

    // Exactly the remaining cpu still fits.
    let resp = api
        .post_server(&fleet.admin, server_body(&fleet, "third", 1, 20, 4096))
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let usage: Value = api
        .client
        .get(api.url(&format!("/v1/nodes/{}/usage", fleet.node_id)))
        .bearer_auth(&fleet.admin)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(usage["servers"], 2);
    assert_eq!(usage["reserved"], json!({ "cpu": 4, "disk": 40, "memory": 8192 }));
    assert_eq!(usage["free"], json!({ "cpu": 0, "disk": 0, "memory": 0 }));
}

#[tokio::test]
async fn test_template_minimums_are_enforced() {
    let api = start_api().await;
    let fleet = fleet(&api).await;

    let resp = api
        .post_server(&fleet.admin, server_body(&fleet, "tiny", 0, 1, 2048))
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let problem: Value = resp.json().await.unwrap();
    let fields: Vec<_> = problem["details"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["field"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(fields, vec!["cpu", "disk"]);

    let resp = api
        .post_server(&fleet.admin, server_body(&fleet, "ok", 1, 5, 1024))
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let server: Value = resp.json().await.unwrap();
    let id = server["id"].as_i64().unwrap();

    let resp = api
        .client
        .patch(api.url(&format!("/v1/servers/{id}")))
        .bearer_auth(&fleet.admin)
        .json(&json!({ "memory": 512 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_update_rechecks_capacity_excluding_itself() {
    let api = start_api().await;
    let fleet = fleet(&api).await;

    let server: Value = api
        .post_server(&fleet.admin, server_body(&fleet, "grow", 2, 10, 2048))
        .await
        .json()
        .await
        .unwrap();
    let id = server["id"].as_i64().unwrap();

    let resp = api
        .client
        .patch(api.url(&format!("/v1/servers/{id}")))
        .bearer_auth(&fleet.admin)
        .json(&json!({ "cpu": 4, "env": { "MOTD": "bigger" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let updated: Value = resp.json().await.unwrap();
    assert_eq!(updated["cpu"], 4);
    assert_eq!(updated["memory"], 2048);
    assert_eq!(updated["env"], json!({ "MOTD": "bigger" }));
    assert_eq!(updated["port"], server["port"]);

    let resp = api
        .client
        .patch(api.url(&format!("/v1/servers/{id}")))
        .bearer_auth(&fleet.admin)
        .json(&json!({ "cpu": 5 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_ports_are_exhausted_and_released() {
    let api = start_api().await;
    let fleet = fleet(&api).await;
    let range_size = i64::from(TEST_PORT_END - TEST_PORT_START) + 1;
    assert_eq!(range_size, 5);

    // Two servers take four of the five ports.
    let first: Value = api
        .post_server(&fleet.admin, server_body(&fleet, "p1", 1, 5, 1024))
        .await
        .json()
        .await
        .unwrap();
    let resp = api
        .post_server(&fleet.admin, server_body(&fleet, "p2", 1, 5, 1024))
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = api
        .post_server(&fleet.admin, server_body(&fleet, "p3", 1, 5, 1024))
        .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let problem: Value = resp.json().await.unwrap();
    assert_eq!(problem["code"], "ports_exhausted");

    let first_id = first["id"].as_i64().unwrap();
    let resp = api
        .client
        .delete(api.url(&format!("/v1/servers/{first_id}")))
        .bearer_auth(&fleet.admin)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = api
        .post_server(&fleet.admin, server_body(&fleet, "p3", 1, 5, 1024))
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let reused: Value = resp.json().await.unwrap();
    assert_eq!(reused["port"], first["port"]);
}

#[tokio::test]
async fn test_duplicate_server_name_conflicts() {
    let api = start_api().await;
    let fleet = fleet(&api).await;

    let resp = api
        .post_server(&fleet.admin, server_body(&fleet, "same", 1, 5, 1024))
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = api
        .post_server(&fleet.admin, server_body(&fleet, "same", 1, 5, 1024))
        .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let problem: Value = resp.json().await.unwrap();
    assert_eq!(problem["detail"], "Server with that name already exists");
}

#[tokio::test]
async fn test_duplicate_container_name_conflicts() {
    let api = start_api().await;
    let fleet = fleet(&api).await;

    let mut body = server_body(&fleet, "first", 1, 5, 1024);
    body["container_name"] = json!("shared-container");
    let resp = api.post_server(&fleet.admin, body).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let mut body = server_body(&fleet, "second", 1, 5, 1024);
    body["container_name"] = json!("shared-container");
    let resp = api.post_server(&fleet.admin, body).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let problem: Value = resp.json().await.unwrap();
    assert_eq!(
        problem["detail"],
        "Server with that container name already exists"
    );

    // The rejected create left no reservation behind.
    let servers = api.db.servers().list_all().await.unwrap();
    assert_eq!(servers.len(), 1);
}

#[tokio::test]
async fn test_unknown_template_or_node_is_not_found() {
    let api = start_api().await;
    let fleet = fleet(&api).await;

    let mut body = server_body(&fleet, "orphan", 1, 5, 1024);
    body["template_id"] = json!(999_999);
    let resp = api.post_server(&fleet.admin, body).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let problem: Value = resp.json().await.unwrap();
    assert_eq!(problem["detail"], "Template not found");

    let mut body = server_body(&fleet, "orphan", 1, 5, 1024);
    body["node_id"] = json!(999_999);
    let resp = api.post_server(&fleet.admin, body).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let problem: Value = resp.json().await.unwrap();
    assert_eq!(problem["detail"], "Node not found");
}

#[tokio::test]
async fn test_servers_are_visible_only_to_linked_users() {
    let api = start_api().await;
    let fleet = fleet(&api).await;

    let alice_name = format!("alice{}", unique_suffix());
    let alice_id = api
        .create_active_user(&fleet.admin, &alice_name, "alice-password")
        .await;
    let alice = api.login(&alice_name, "alice-password").await;

    let bob_name = format!("bob{}", unique_suffix());
    let bob_id = api
        .create_active_user(&fleet.admin, &bob_name, "bob-password")
        .await;
    let bob = api.login(&bob_name, "bob-password").await;

    // Alice's server is linked to her on creation.
    let resp = api
        .post_server(&alice, server_body(&fleet, "alices", 1, 5, 1024))
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let server: Value = resp.json().await.unwrap();
    let server_id = server["id"].as_i64().unwrap();
    let server_url = api.url(&format!("/v1/servers/{server_id}"));

    let resp = api.client.get(&server_url).bearer_auth(&bob).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let listed: Value = api
        .client
        .get(api.url("/v1/servers"))
        .bearer_auth(&bob)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["items"], json!([]));

    let index: Value = api
        .client
        .get(api.url("/v1/search/servers"))
        .bearer_auth(&bob)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(index["items"], json!({}));

    // Alice shares the server with Bob.
    let resp = api
        .client
        .post(api.url(&format!("/v1/servers/{server_id}/users")))
        .bearer_auth(&alice)
        .json(&json!({ "user_id": bob_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = api.client.get(&server_url).bearer_auth(&bob).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let users: Value = api
        .client
        .get(api.url(&format!("/v1/servers/{server_id}/users")))
        .bearer_auth(&bob)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let mut linked: Vec<i64> = users["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["id"].as_i64().unwrap())
        .collect();
    linked.sort_unstable();
    assert_eq!(linked, vec![alice_id, bob_id]);

    // Removing the link hides it again.
    let resp = api
        .client
        .delete(api.url(&format!("/v1/servers/{server_id}/users/{bob_id}")))
        .bearer_auth(&alice)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = api.client.get(&server_url).bearer_auth(&bob).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = api
        .client
        .delete(api.url(&format!("/v1/servers/{server_id}/users/{bob_id}")))
        .bearer_auth(&alice)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    // Admins see everything.
    let resp = api
        .client
        .get(&server_url)
        .bearer_auth(&fleet.admin)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_available_ports_rejects_bad_count() {
    let api = start_api().await;
    let admin = api.admin_token().await;

    for count in ["0", "65"] {
        let resp = api
            .client
            .get(api.url(&format!("/v1/servers/ports/available?count={count}")))
            .bearer_auth(&admin)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "count={count}");
    }

    let resp = api
        .client
        .get(api.url("/v1/servers/ports/available?count=6"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_invalid_path_id_is_bad_request() {
    let api = start_api().await;
    let admin = api.admin_token().await;

    let resp = api
        .client
        .get(api.url("/v1/servers/not-a-number"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
