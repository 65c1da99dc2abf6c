// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

use xmldb_remote::{Properties, ResourceKind, Session};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let uri =
        std::env::var("XMLDB_URI").unwrap_or_else(|_| "xmldb:tcp://127.0.0.1:8080/db".to_string());
    let mut props = Properties::new();
    if let Ok(user) = std::env::var("XMLDB_USER") {
        props.insert("user".into(), user);
    }
    if let Ok(password) = std::env::var("XMLDB_PASSWORD") {
        props.insert("password".into(), password);
    }

    let session = Session::connect(&uri, props, Vec::new())?;
    let info = session.system_info()?;
    let Some(root) = session.root_collection()? else {
        println!("{uri}: no such collection on {} {}", info.name, info.version);
        return Ok(());
    };

    let mut resource = root.create_resource("hello.xml", ResourceKind::Xml)?;
    resource.set_content("<hello>from Rust</hello>");
    let status = root.store_resource(&resource)?;

    println!(
        "server={} {}, collection={}, stored {} bytes ({}), resources={:?}",
        info.name,
        info.version,
        root,
        status.bytes,
        status.status,
        root.list_resources()?
    );
    resource.close()?;
    root.close()?;
    Ok(())
}
