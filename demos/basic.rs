use fetch_executor::{RequestExecutor, RequestSpec, RetryPolicy};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let url = std::env::var("FETCH_URL")?;

    let executor = RequestExecutor::default();

    let response = executor
        .execute_with_retry(
            &RequestSpec::get(&url).timeout_ms(5_000),
            &RetryPolicy::exponential(4, 250),
        )
        .await?;
    println!("{} -> {}", url, response.status);

    let outcomes = executor
        .execute_batch_concurrent([RequestSpec::get(&url), RequestSpec::get(&url)])
        .await;
    for (index, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(response) => println!("batch[{index}]: {}", response.status),
            Err(err) => eprintln!("batch[{index}]: {err}"),
        }
    }

    Ok(())
}
