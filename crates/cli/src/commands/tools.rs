//! `redscope tools`: show tool providers and the tools they expose.

use crate::runtime::Runtime;

pub async fn run(runtime: &Runtime) -> anyhow::Result<()> {
    let lines = runtime.provider_lines();
    if lines.is_empty() {
        println!("No tool providers configured.");
        return Ok(());
    }

    println!();
    println!("  Providers:");
    for line in lines {
        println!("    {line}");
    }

    for (provider, tools) in runtime.registry.tools().tools_by_provider().await {
        println!();
        match tools {
            Ok(tools) => {
                println!("  {provider} ({} tools)", tools.len());
                for tool in tools {
                    println!("    - {}: {}", tool.name, tool.description);
                }
            }
            Err(e) => println!("  {provider}: failed to list tools ({e})"),
        }
    }
    println!();
    Ok(())
}
