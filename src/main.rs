// projeto: lstmdbtrain
// file: src/main.rs
// Ponto de entrada: treino, teste e predição de LSTM alimentados pelo banco de documentos

mod neural;

use chrono::Utc;
use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::time::Instant;

use crate::neural::config::ConfigSource;
use crate::neural::db::open_store;
use crate::neural::importer::import_documents;
use crate::neural::orchestrator::run;
use crate::neural::{HarnessConfig, TrainingError, model};

#[derive(Parser, Debug)]
#[command(
    name = "lstmdb",
    version = "0.1.0",
    about = "Treino, avaliação e predição de LSTM empilhada a partir de consultas paginadas no banco",
    long_about = "Lê lotes de tamanho fixo de documentos de séries temporais, treina uma LSTM empilhada, salva snapshots do modelo no mesmo banco e grava as predições em CSV."
)]
struct Cli {
    /// Arquivo de configuração TOML
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// URL do banco (postgres://..., sqlite://arquivo ou sqlite::memory:)
    #[arg(long)]
    db_url: Option<String>,

    /// Treinar (equivale a toTrain = true)
    #[arg(long)]
    train: bool,

    /// Avaliar na coleção de teste (toTest = true)
    #[arg(long)]
    test: bool,

    /// Gerar predições em CSV (toPredict = true)
    #[arg(long)]
    predict: bool,

    /// Retomar o último snapshot salvo em vez de criar um modelo novo
    #[arg(long)]
    retrain: bool,

    /// Total de épocas alvo
    #[arg(long)]
    epochs: Option<usize>,

    /// Arquivo JSON ou JSON lines a importar antes da execução
    #[arg(long)]
    import: Option<PathBuf>,

    /// Coleção de destino da importação (padrão: coll)
    #[arg(long)]
    import_coll: Option<String>,

    /// Caminho do CSV de predições
    #[arg(long)]
    predictions: Option<PathBuf>,

    /// Modo verboso de logging
    #[arg(long)]
    verbose: bool,
}

impl Cli {
    fn apply_overrides(&self, config: &mut HarnessConfig) {
        if let Some(db_url) = &self.db_url {
            config.db_url = db_url.clone();
        }
        if let Some(epochs) = self.epochs {
            config.epochs = epochs;
        }
        if let Some(path) = &self.predictions {
            config.predictions_path = path.clone();
        }
        config.to_train |= self.train || self.retrain;
        config.to_re_train |= self.retrain;
        config.to_test |= self.test;
        config.to_predict |= self.predict;
    }
}

fn main() -> Result<(), TrainingError> {
    let cli = Cli::parse();

    let (config, source) = match load_config(&cli) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("❌ Configuração inválida: {}", e);
            std::process::exit(1);
        }
    };
    setup_logging(&config, cli.verbose);

    let start_time = Instant::now();
    info!("🚀 lstmdb iniciado");
    match &source {
        ConfigSource::File(path) => info!("⚙️ Configuração carregada de {}", path.display()),
        ConfigSource::Defaults(path) => {
            warn!("⚠️ Arquivo {} não encontrado, usando configuração padrão", path.display())
        }
    }
    info!(
        "📊 Camadas: {} | Hidden: {} | Lote: {} | Passos: {} | Épocas: {}",
        config.layers, config.int_layer_dim, config.batch_size, config.time_steps, config.epochs
    );
    info!("🕐 Iniciado em: {}", Utc::now().format("%Y-%m-%d %H:%M:%S"));

    match execute(&cli, &config) {
        Ok(()) => {
            info!("✅ Execução concluída em {:.2}s", start_time.elapsed().as_secs_f64());
            info!("🏁 Finalizado em: {}", Utc::now().format("%Y-%m-%d %H:%M:%S"));
        }
        Err(e) => {
            error!("❌ Erro durante a execução: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<(HarnessConfig, ConfigSource), TrainingError> {
    let (mut config, source) = HarnessConfig::load_or_default(&cli.config)?;
    cli.apply_overrides(&mut config);
    config.validate()?;
    Ok((config, source))
}

fn setup_logging(config: &HarnessConfig, verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        config.log_filter()
    };

    env_logger::Builder::from_default_env()
        .filter_level(level)
        .filter_module(model::LOG_TARGET, config.model_log_filter().min(level))
        .format_timestamp_secs()
        .init();
}

fn execute(cli: &Cli, config: &HarnessConfig) -> Result<(), TrainingError> {
    let store = open_store(&config.db_url)?;

    if let Some(path) = &cli.import {
        let collection = cli.import_coll.as_deref().unwrap_or(&config.coll);
        let imported = import_documents(store.as_ref(), collection, path, config.chunk_size)?;
        info!("📥 {} documentos importados em '{}'", imported, collection);
    }

    let summary = run(config, store.as_ref())?;
    if let Some(training) = &summary.training {
        info!("📋 Resumo do treinamento:");
        info!("   ├── Época inicial: {}", training.start_epoch);
        info!("   ├── Épocas executadas: {}", training.epochs_run);
        info!("   ├── Lotes: {}", training.batches);
        info!("   └── Perda média: {:?}", training.average_loss);
    }
    if let Some(loss) = summary.test_loss {
        info!("🧪 Perda no teste: {:.6}", loss);
    }
    if let Some(prediction) = &summary.prediction {
        info!("🔮 {} predições em {}", prediction.rows, prediction.path.display());
    }
    Ok(())
}
