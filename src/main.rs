// 该文件是 Dimple （骶部小凹筛查） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

mod args;

use anyhow::{Result, bail};
use clap::Parser;
use tracing::info;

use args::{Args, Command, ConfigAction};
use dimple::{
  Classifier, ConfigResolver, FromUrl,
  config::{ConfigKey, JsonFileStore, QueryOverrides},
  input::InputWrapper,
  model::{ModelLoader, Predictor},
  output::OutputWrapper,
  task::{ContinuousTask, Task},
};

fn config_key(name: &str) -> Result<ConfigKey> {
  match ConfigKey::from_store_name(name) {
    Some(key) => Ok(key),
    None => {
      let known: Vec<&str> = ConfigKey::ALL.iter().map(|k| k.store_name()).collect();
      bail!("未知的配置项 '{}', 可选: {}", name, known.join(", "))
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型位置: {}", args.model);
  info!("持久化覆盖: {}", args.overrides.display());

  let mut store = JsonFileStore::load(&args.overrides)?;
  let query = QueryOverrides::parse(args.query.as_deref().unwrap_or_default());

  match args.command {
    Command::Predict {
      input,
      output,
      limit,
    } => {
      info!("输入来源: {}", input);
      info!("输出方式: {}", output);

      let config = ConfigResolver::default()
        .layer(&query)
        .layer(&store)
        .resolve();
      info!("生效配置: {:?}", config);

      let classifier = Classifier::new(ModelLoader::from_location(args.model));
      let input = InputWrapper::from_url(&input)?;
      let output = OutputWrapper::from_url(&output)?;

      ContinuousTask::default()
        .with_frame_number(limit)
        .run_task(input, &classifier, &config, output)
        .await?;
    }
    Command::Load => {
      let loader = ModelLoader::from_location(args.model);
      let now = std::time::Instant::now();
      let predictor = loader.load().await?;
      info!("模型加载完成: {}, 耗时: {:.2?}", predictor.format(), now.elapsed());
      match predictor {
        Predictor::Graph(graph) => match graph.signature() {
          Some(names) => info!("签名: 输入 {}, 输出 {}", names.input, names.output),
          None => info!("描述文件中没有签名"),
        },
        Predictor::Layers(layers) => {
          let names: Vec<&str> = layers.layer_names().collect();
          info!("共 {} 层: {}", names.len(), names.join(" -> "));
        }
      }
    }
    Command::Config { action } => match action {
      ConfigAction::Show => {
        let config = ConfigResolver::default()
          .layer(&query)
          .layer(&store)
          .resolve();
        println!("{}", serde_json::to_string_pretty(&config)?);
        for (key, value) in store.entries() {
          println!("{} = {} ({})", key.store_name(), value, store.path().display());
        }
      }
      ConfigAction::Set { key, value } => {
        let key = config_key(&key)?;
        if !key.accepts(&value) {
          bail!("配置项 '{}' 的值无效: {}", key.store_name(), value);
        }
        store.set(key, value.trim());
        store.save()?;
        info!("已保存 {} = {}", key.store_name(), value.trim());
      }
      ConfigAction::Unset { key } => {
        let key = config_key(&key)?;
        if store.remove(key) {
          store.save()?;
          info!("已删除 {}", key.store_name());
        } else {
          info!("{} 未设置", key.store_name());
        }
      }
    },
  }

  Ok(())
}
