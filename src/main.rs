use anyhow::{anyhow, Result};
use bson::{doc, Document};

use rs_saml::browser::SystemBrowser;
use rs_saml::sasl::SamlClient;
use rs_saml::transport::Transport;
use rs_saml::Driver;

use conn::Conn;
use options::ClientOptions;

mod conn;
mod options;
mod stream;

const USAGE: &str =
    "usage: saml-login mongodb://<domain>@<host>[:<port>][/?tls=true&tlsCAFile=<path>]";

#[tokio::main]
async fn main() -> Result<()> {
    let uri = std::env::args().nth(1).ok_or_else(|| anyhow!(USAGE))?;
    let opts = ClientOptions::parse(&uri)?;

    println!("Connecting to {}:{}", opts.host, opts.port);
    let mut conn = Conn::connect(&opts).await?;
    if conn.is_tls() {
        println!("TLS established");
    }

    let mut driver = Driver::new();
    driver.max_rounds = opts.max_sasl_rounds;

    println!("Signing in as {}, complete the sign-in in your browser", opts.username);
    let mut client = SamlClient::new(opts.username.as_str(), SystemBrowser);
    if let Err(e) = driver.run(&mut client, &mut conn).await {
        println!("Authentication failed: {}", e);
        let _ = conn.close().await;
        return Err(e.into());
    }
    println!("Authentication succeeded");

    let status = conn.command("admin", doc! { "connectionStatus": 1 }).await?;
    print_users(&status);

    conn.close().await
}

fn print_users(status: &Document) {
    let users = status
        .get_document("authInfo")
        .and_then(|info| info.get_array("authenticatedUsers"));

    match users {
        Ok(users) if !users.is_empty() => {
            for user in users.iter().filter_map(|u| u.as_document()) {
                println!(
                    "authenticated: {} on {}",
                    user.get_str("user").unwrap_or("?"),
                    user.get_str("db").unwrap_or("?")
                );
            }
        }
        _ => println!("Server reports no authenticated users"),
    }
}
