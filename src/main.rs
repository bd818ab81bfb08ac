//! Homeostat - 稳态执行核心
//!
//! 入口：初始化日志、加载配置、构建执行器，执行命令行传入的一次请求并输出结果。

use anyhow::{bail, Context};
use homeostat::config::load_config;
use homeostat::llm::{create_llm_from_config, LlmClient};
use homeostat::{observability, ExecutorBuilder};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let request = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if request.trim().is_empty() {
        bail!("usage: homeostat <request...>");
    }

    let config_path = std::env::var("HOMEOSTAT_CONFIG").ok().map(Into::into);
    let config = load_config(config_path).context("Failed to load config")?;
    let llm = create_llm_from_config(&config);
    let executor = ExecutorBuilder::new(config).with_llm(llm.clone()).build();

    let ctx = executor.execute(&request).await;
    match (&ctx.reply, &ctx.error) {
        (Some(reply), _) => println!("{reply}"),
        (None, Some(err)) => eprintln!("error: {err}"),
        (None, None) => eprintln!("error: task ended without a reply"),
    }

    executor.drain_reflections().await;

    let stats = executor.cache().stats();
    let (prompt_tokens, completion_tokens, total_tokens) = llm.token_usage();
    println!(
        "[trace {}] state={} mode={} cache_hit_rate={:.2} tokens={}/{}/{}",
        ctx.trace_id,
        ctx.final_state(),
        executor.mode().mode(),
        stats.hit_rate(),
        prompt_tokens,
        completion_tokens,
        total_tokens
    );
    Ok(())
}
