mod common;

use reqwest::StatusCode;
use serde_json::{json, Value};

use common::{start_api, unique_suffix};

fn minecraft(name: &str) -> Value {
    json!({
        "name": name,
        "image": "itzg/minecraft-server:latest",
        "description": "Vanilla",
        "tags": ["java"],
        "default_env": { "EULA": "TRUE" },
        "user_env": { "MOTD": "hello" },
        "exposed_port": [25565],
        "exposed_volume": ["/data"],
        "resource_min_cpu": 2,
        "resource_min_disk": 10,
        "resource_min_mem": 2048
    })
}

#[tokio::test]
async fn test_template_crud() {
    let api = start_api().await;
    let admin = api.admin_token().await;
    let name = format!("mc-{}", unique_suffix());

    let created = api.create_template(&admin, minecraft(&name)).await;
    let id = created["id"].as_i64().unwrap();
    assert_eq!(created["default_env"]["EULA"], "TRUE");
    assert_eq!(created["exposed_port"], json!([25565]));

    let fetched: Value = api
        .client
        .get(api.url(&format!("/v1/templates/{id}")))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched, created);

    let resp = api
        .client
        .patch(api.url(&format!("/v1/templates/{id}")))
        .bearer_auth(&admin)
        .json(&json!({ "image": "itzg/minecraft-server:java21", "resource_min_mem": 4096 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let updated: Value = resp.json().await.unwrap();
    assert_eq!(updated["image"], "itzg/minecraft-server:java21");
    assert_eq!(updated["resource_min_mem"], 4096);
    assert_eq!(updated["resource_min_cpu"], 2);
    assert_eq!(updated["name"], name.as_str());

    let index: Value = api
        .client
        .get(api.url("/v1/search/templates"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(index["items"][name.as_str()], id);

    let resp = api
        .client
        .delete(api.url(&format!("/v1/templates/{id}")))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = api
        .client
        .get(api.url(&format!("/v1/templates/{id}")))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_duplicate_template_name_conflicts() {
    let api = start_api().await;
    let admin = api.admin_token().await;
    let name = format!("mc-{}", unique_suffix());

    api.create_template(&admin, minecraft(&name)).await;

    let resp = api
        .client
        .post(api.url("/v1/templates"))
        .bearer_auth(&admin)
        .json(&minecraft(&name))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let problem: Value = resp.json().await.unwrap();
    assert_eq!(problem["detail"], "Template with that name already exists");
}

#[tokio::test]
async fn test_invalid_template_is_rejected() {
    let api = start_api().await;
    let admin = api.admin_token().await;

    let mut body = minecraft("broken");
    body["exposed_port"] = json!([70000]);
    body["resource_min_cpu"] = json!(-1);

    let resp = api
        .client
        .post(api.url("/v1/templates"))
        .bearer_auth(&admin)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let problem: Value = resp.json().await.unwrap();
    let fields: Vec<_> = problem["details"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["field"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(fields, vec!["exposed_port", "resource_min_cpu"]);
}

#[tokio::test]
async fn test_template_writes_require_admin() {
    let api = start_api().await;
    let admin = api.admin_token().await;
    let username = format!("player{}", unique_suffix());
    api.create_active_user(&admin, &username, "player-password")
        .await;
    let player = api.login(&username, "player-password").await;

    let resp = api
        .client
        .post(api.url("/v1/templates"))
        .bearer_auth(&player)
        .json(&minecraft("sneaky"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = api
        .client
        .get(api.url("/v1/templates"))
        .bearer_auth(&player)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_template_in_use_cannot_be_deleted() {
    let api = start_api().await;
    let admin = api.admin_token().await;

    let template = api
        .create_template(&admin, minecraft(&format!("mc-{}", unique_suffix())))
        .await;
    let node = api.create_node(&admin, 8, 100, 8192).await;

    let resp = api
        .post_server(
            &admin,
            json!({
                "name": format!("srv-{}", unique_suffix()),
                "template_id": template["id"],
                "node_id": node["id"],
                "cpu": 2,
                "disk": 10,
                "memory": 2048
            }),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let template_id = template["id"].as_i64().unwrap();
    let resp = api
        .client
        .delete(api.url(&format!("/v1/templates/{template_id}")))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let node_id = node["id"].as_i64().unwrap();
    let resp = api
        .client
        .delete(api.url(&format!("/v1/nodes/{node_id}")))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_minimums_cannot_exceed_existing_servers() {
    let api = start_api().await;
    let admin = api.admin_token().await;

    let template = api
        .create_template(&admin, minecraft(&format!("mc-{}", unique_suffix())))
        .await;
    let template_id = template["id"].as_i64().unwrap();
    let node = api.create_node(&admin, 8, 100, 8192).await;

    let server_name = format!("srv-{}", unique_suffix());
    let resp = api
        .post_server(
            &admin,
            json!({
                "name": server_name,
                "template_id": template_id,
                "node_id": node["id"],
                "cpu": 2,
                "disk": 10,
                "memory": 2048
            }),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = api
        .client
        .patch(api.url(&format!("/v1/templates/{template_id}")))
        .bearer_auth(&admin)
        .json(&json!({ "resource_min_cpu": 4 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let problem: Value = resp.json().await.unwrap();
    assert!(problem["detail"].as_str().unwrap().contains(&server_name));

    let unchanged: Value = api
        .client
        .get(api.url(&format!("/v1/templates/{template_id}")))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(unchanged["resource_min_cpu"], 2);

    // Raising a minimum up to the existing reservation is fine.
    let resp = api
        .client
        .patch(api.url(&format!("/v1/templates/{template_id}")))
        .bearer_auth(&admin)
        .json(&json!({ "resource_min_mem": 2048, "description": "Tuned" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let updated: Value = resp.json().await.unwrap();
    assert_eq!(updated["resource_min_mem"], 2048);
    assert_eq!(updated["resource_min_cpu"], 2);
    assert_eq!(updated["description"], "Tuned");
}
