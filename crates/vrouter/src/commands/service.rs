//! `vrouter service {add|delete|list}`.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use vrouter_common::ServiceDescriptor;

use crate::context::AppContext;

#[derive(Args, Debug)]
pub struct ServiceArgs {
    #[command(subcommand)]
    pub action: ServiceAction,
}

#[derive(Subcommand, Debug)]
pub enum ServiceAction {
    /// Register a new service
    Add {
        name: String,

        /// Attribute as key=value, repeatable
        #[arg(short, long = "attr", value_parser = parse_attr)]
        attrs: Vec<(String, String)>,
    },
    /// Remove a registered service
    Delete { name: String },
    /// List registered services
    List {
        /// Print descriptors as JSON
        #[arg(long)]
        json: bool,
    },
}

fn parse_attr(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.trim().to_string())),
        _ => Err(format!("expected key=value, got '{s}'")),
    }
}

pub async fn run(ctx: &AppContext, args: ServiceArgs) -> Result<()> {
    match args.action {
        ServiceAction::Add { name, attrs } => {
            let descriptor = attrs
                .into_iter()
                .fold(ServiceDescriptor::new(name), |d, (k, v)| d.with_attribute(k, v));
            ctx.registry
                .add_service(&descriptor)
                .await
                .with_context(|| format!("Error to add service {}", descriptor.name))?;
            println!("service {} added", descriptor.name);
        }
        ServiceAction::Delete { name } => {
            ctx.registry
                .delete_service(&name)
                .await
                .with_context(|| format!("Error to delete service {name}"))?;
            println!("service {name} deleted");
        }
        ServiceAction::List { json } => {
            let services = ctx.registry.list_services().await.context("Error to list services")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&services)?);
            } else {
                for svc in &services {
                    let attrs: Vec<String> = svc
                        .attributes
                        .iter()
                        .map(|(k, v)| format!("{k}={v}"))
                        .collect();
                    println!("{}\t{}", svc.name, attrs.join(","));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::store::{MemoryStore, Store};

    #[test]
    fn test_parse_attr() {
        assert_eq!(parse_attr("port=80").unwrap(), ("port".to_string(), "80".to_string()));
        assert_eq!(parse_attr("cmd=a=b").unwrap().1, "a=b");
        assert!(parse_attr("port").is_err());
        assert!(parse_attr("=80").is_err());
    }

    #[tokio::test]
    async fn test_add_then_delete() {
        let ctx = AppContext::with_store(AppConfig::default(), Store::Memory(MemoryStore::new()));
        let add = ServiceArgs {
            action: ServiceAction::Add {
                name: "web".to_string(),
                attrs: vec![("port".to_string(), "80".to_string())],
            },
        };
        run(&ctx, add).await.unwrap();

        let listed = ctx.registry.list_services().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].attributes["port"], "80");

        let delete = || ServiceArgs {
            action: ServiceAction::Delete { name: "web".to_string() },
        };
        run(&ctx, delete()).await.unwrap();
        assert!(run(&ctx, delete()).await.is_err());
    }
}
